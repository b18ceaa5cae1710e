// SPDX-License-Identifier: AGPL-3.0-only

//! STMD walker validation — synthetic energy trace through all four stages.
//!
//! Drives one engine with a reflected random walk over the energy window
//! (a stand-in for the host MD sampler) and checks the schedule
//! invariants end-to-end:
//!   1. DIG → LEARN → CONVERGE → PRODUCTION promotion chain
//!   2. f monotone non-increasing, df = ln(f)/(2Δ) throughout
//!   3. ladder clamped to [T1, T2]
//!   4. restart blob round-trips the persistent state
//!   5. stage-gated exchange between two loopback walkers
//!
//! Exit code 0 (all checks pass) or 1 (any check fails).
//! Run: cargo run --release --bin stmd_walker

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use restmd::rxc::{run_attempt, ExchangeCoordinator, ExchangePolicy, LoopbackRoots};
use restmd::tolerances;
use restmd::{FReduction, Stage, StmdConfig, StmdEngine};

fn main() {
    println!("══════════════════════════════════════════════════════════");
    println!("  STMD walker validation — synthetic double-well trace");
    println!("══════════════════════════════════════════════════════════");
    println!();

    let out_dir = std::env::temp_dir().join("restmd_walker_demo");
    let _ = std::fs::remove_dir_all(&out_dir);

    let mut config = StmdConfig::synthetic_well(&out_dir);
    config.f_style = FReduction::Sqrt;
    config.rst_frq = 5_000;
    let mut engine = StmdEngine::new(config.clone(), 0, 1, true).expect("engine construction");

    let mut rng = StdRng::seed_from_u64(84);
    let mut u = -20.0f64;
    let lo = config.e_min + 2.0 * config.bin_width;
    let hi = config.e_max - 2.0 * config.bin_width;

    let mut failures = 0usize;
    let mut check = |label: &str, pass: bool| {
        println!("  [{}] {label}", if pass { "PASS" } else { "FAIL" });
        if !pass {
            failures += 1;
        }
    };

    let budget = 2_000_000u64;
    let mut f_prev = engine.f();
    let mut f_monotone = true;
    let mut df_consistent = true;
    let mut ladder_clamped = true;
    let mut stage_monotone = true;
    let mut stage_prev = engine.stage();
    let mut step = 0u64;

    while engine.stage() < Stage::Production && step < budget {
        step += 1;
        u = (u + rng.gen_range(-4.0..4.0)).clamp(lo, hi);
        engine.on_step(step, u).expect("in-window step");

        if engine.f() > f_prev + 1e-15 {
            f_monotone = false;
        }
        f_prev = engine.f();
        let df_expect = engine.f().ln() * 0.5 / config.bin_width;
        if (engine.df() - df_expect).abs() > tolerances::DF_CONSISTENCY_TOL {
            df_consistent = false;
        }
        if engine.stage() < stage_prev {
            stage_monotone = false;
        }
        stage_prev = engine.stage();
    }
    let t1 = config.t1();
    let t2 = config.t2();
    for &y in engine.table().ladder() {
        if y < t1 - 1e-12 || y > t2 + 1e-12 {
            ladder_clamped = false;
        }
    }

    println!();
    println!(
        "  reached stage {} after {step} steps (f= {:.9})",
        engine.stage().as_number(),
        engine.f(),
    );
    println!();

    check("production stage reached within budget", engine.stage() == Stage::Production);
    check("f monotone non-increasing", f_monotone);
    check("df consistent with ln(f)/(2Δ)", df_consistent);
    check("stage monotone non-decreasing", stage_monotone);
    check("ladder clamped to [T1, T2]", ladder_clamped);
    check(
        "frozen f at or below the production threshold",
        engine.f() <= config.converge_threshold() + 1e-15,
    );
    check(
        "production histogram accumulating",
        engine.table().hist_production().iter().sum::<u64>() > 0,
    );

    // Keep production running a little so the restart blob is recent.
    for _ in 0..10_000 {
        step += 1;
        u = (u + rng.gen_range(-4.0..4.0)).clamp(lo, hi);
        engine.on_step(step, u).expect("in-window step");
    }
    let before = engine.to_blob();
    before.write(&out_dir, 0).expect("blob write");

    let mut resumed_config = config.clone();
    resumed_config.restart = true;
    let resumed = StmdEngine::new(resumed_config, 0, 1, false).expect("restart");
    let after = resumed.to_blob();
    check("restart restores stage and f", after.stage == before.stage && after.f == before.f);
    check("restart restores ladder bit-identically", after.ladder == before.ladder);
    check(
        "restart restores cumulative histograms",
        after.hist_total == before.hist_total && after.hist_production == before.hist_production,
    );
    check(
        "restart zeroes the flatness window",
        resumed.count_h() == 0 && resumed.table().hist().iter().all(|&h| h == 0),
    );

    // ── Two-walker loopback exchange ───────────────────────────────
    println!();
    let mut coord = ExchangeCoordinator::new(ExchangePolicy::default());
    let mut roots = LoopbackRoots::new();

    // Walker 1 still digging: the stage gate must reject the pair.
    let mut gated = engine.exchange_summary();
    gated.walker = 1;
    gated.stage = 1;
    let local = engine.exchange_summary();
    roots.stage(vec![local.clone(), gated]);
    let decisions = run_attempt(&mut coord, &mut roots, &local).expect("exchange attempt");
    coord.print_status(&decisions);
    check(
        "exchange rejected across the stage gate",
        decisions.len() == 1 && !decisions[0].accepted(),
    );

    // Same walker pair once both are in production: self-exchange is
    // energetically neutral (Δ = 0) and must accept. Fresh coordinator so
    // the attempt parity starts even again.
    let mut coord = ExchangeCoordinator::new(ExchangePolicy::default());
    let mut partner = engine.exchange_summary();
    partner.walker = 1;
    roots.stage(vec![local.clone(), partner]);
    let decisions = run_attempt(&mut coord, &mut roots, &local).expect("exchange attempt");
    coord.print_status(&decisions);
    check(
        "neutral exchange accepted in production",
        decisions.len() == 1 && decisions[0].accepted(),
    );

    println!();
    if failures == 0 {
        println!("  ALL CHECKS PASSED");
    } else {
        println!("  {failures} CHECK(S) FAILED");
        std::process::exit(1);
    }
}
