//! Plan generation and timing CLI for the MPC KKT kernel.

mod test_problems;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kkt_core::{KktSettings, KktSystem, MpcProblem, Ordering, Plan};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "kkt-bench", about = "Generate sparsity plans and time the KKT kernel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a plan, print its statistics and optionally save it as JSON
    Plan {
        #[command(flatten)]
        problem: ProblemArgs,

        #[arg(long, value_enum, default_value_t = OrderingChoice::StageWise)]
        ordering: OrderingChoice,

        /// Treat every stage-matrix entry as structural
        #[arg(long)]
        dense: bool,

        /// Write the plan to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Compare fill-in of every built-in ordering
    Orderings {
        #[command(flatten)]
        problem: ProblemArgs,
    },

    /// Time assembly, factorization and solves over simulated iterations
    Run {
        #[command(flatten)]
        problem: ProblemArgs,

        #[arg(long, value_enum, default_value_t = OrderingChoice::StageWise)]
        ordering: OrderingChoice,

        /// Load the plan from JSON instead of generating it
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Simulated interior-point iterations
        #[arg(long, default_value_t = 20)]
        iters: usize,

        /// Solves per factorization (predictor + corrector)
        #[arg(long, default_value_t = 2)]
        solves: usize,

        /// Override the pivot regularization
        #[arg(long)]
        reg: Option<f64>,

        /// Override the refinement steps
        #[arg(long)]
        refine_steps: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct ProblemArgs {
    #[arg(long, value_enum, default_value_t = ProblemChoice::Quadrotor)]
    problem: ProblemChoice,

    #[arg(long, default_value_t = 10)]
    horizon: usize,

    /// States (random problems)
    #[arg(long, default_value_t = 8)]
    nx: usize,

    /// Inputs (random problems)
    #[arg(long, default_value_t = 3)]
    nu: usize,

    #[arg(long, default_value_t = 12345)]
    seed: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ProblemChoice {
    Quadrotor,
    Random,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OrderingChoice {
    Natural,
    StageWise,
    Rcm,
}

impl From<OrderingChoice> for Ordering {
    fn from(choice: OrderingChoice) -> Self {
        match choice {
            OrderingChoice::Natural => Ordering::Natural,
            OrderingChoice::StageWise => Ordering::StageWise,
            OrderingChoice::Rcm => Ordering::ReverseCuthillMcKee,
        }
    }
}

impl ProblemArgs {
    fn build(&self) -> MpcProblem {
        match self.problem {
            ProblemChoice::Quadrotor => test_problems::quadrotor(self.horizon),
            ProblemChoice::Random => test_problems::random_mpc(self.nx, self.nu, self.horizon, self.seed),
        }
    }
}

fn save_plan(plan: &Plan, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create file {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), plan)
        .with_context(|| format!("Failed to write JSON to {}", path.display()))?;
    Ok(())
}

fn load_plan(path: &Path) -> Result<Plan> {
    let file = File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;
    let plan: Plan = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON from {}", path.display()))?;
    plan.validate()
        .with_context(|| format!("Plan in {} is inconsistent", path.display()))?;
    Ok(plan)
}

fn cmd_plan(args: &ProblemArgs, ordering: OrderingChoice, dense: bool, output: Option<&Path>) -> Result<()> {
    let problem = args.build();
    let plan = if dense {
        let dims = problem.validate()?;
        Plan::generate_dense(dims, ordering.into())?
    } else {
        Plan::generate(&problem, ordering.into())?
    };

    println!("{:?}", plan.dims());
    println!("{:?}: {}", ordering, plan.stats());

    if let Some(path) = output {
        save_plan(&plan, path)?;
        println!("Plan written to {}", path.display());
    }
    Ok(())
}

fn cmd_orderings(args: &ProblemArgs) -> Result<()> {
    let problem = args.build();
    println!("{:?}", problem.validate()?);
    println!("{:<12} {:>8} {:>10} {:>10} {:>10}", "ordering", "n", "L nnz", "fill-in", "deps");
    for choice in [OrderingChoice::Natural, OrderingChoice::StageWise, OrderingChoice::Rcm] {
        let stats = Plan::generate(&problem, choice.into())?.stats();
        println!(
            "{:<12} {:>8} {:>10} {:>10} {:>10}",
            format!("{:?}", choice),
            stats.n,
            stats.l_nnz,
            stats.fill_in,
            stats.dependencies
        );
    }
    Ok(())
}

#[derive(Default)]
struct Timings {
    fill: f64,
    factor: f64,
    solve: f64,
}

/// Summary of one `run`, in microseconds.
#[derive(Debug, Serialize)]
struct RunReport {
    n: usize,
    l_nnz: usize,
    iterations: usize,
    fill_us: f64,
    factor_us: f64,
    solve_us: f64,
    worst_residual: f64,
    sign_flips: usize,
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    args: &ProblemArgs,
    ordering: OrderingChoice,
    plan_path: Option<&Path>,
    iters: usize,
    solves: usize,
    reg: Option<f64>,
    refine_steps: Option<usize>,
    json: bool,
) -> Result<()> {
    if iters == 0 {
        bail!("--iters must be at least 1");
    }

    let problem = args.build();
    let plan = match plan_path {
        Some(path) => load_plan(path)?,
        None => Plan::generate(&problem, ordering.into())?,
    };
    let stats = plan.stats();
    log::info!("{}", stats);

    let mut settings = KktSettings::from_env();
    if let Some(reg) = reg {
        settings.kkt_reg = reg;
    }
    if let Some(steps) = refine_steps {
        settings.refine_steps = steps;
    }

    let mut system = KktSystem::new(Arc::new(plan), problem, settings)?;
    let n = system.n();
    let n_ineq = system.plan().dims().n_ineq();
    let mut var = vec![0.0; n];
    let mut timings = Timings::default();
    let mut worst_residual = 0.0_f64;
    let mut sign_flips = 0;

    for it in 0..iters {
        let s_inv_z = test_problems::weights(n_ineq, it, args.seed);

        let start = Instant::now();
        system.fill_kkt(&s_inv_z);
        timings.fill += start.elapsed().as_secs_f64();

        let start = Instant::now();
        let factor = system.ldl_factor();
        timings.factor += start.elapsed().as_secs_f64();
        sign_flips += factor.sign_flips();

        for k in 0..solves {
            let target = test_problems::rhs(n, args.seed.wrapping_add((it * solves + k) as u64));
            let start = Instant::now();
            system.solve(&factor, &target, &mut var);
            timings.solve += start.elapsed().as_secs_f64();

            let residual = system.check_residual(&target, &var).sqrt();
            worst_residual = worst_residual.max(residual);
        }

        log::debug!(
            "iteration {}: |K - LDL'|_F^2 = {:.3e}",
            it,
            system.check_factorization(&factor)
        );
    }

    let per_iter = |total: f64| 1e6 * total / iters as f64;
    let report = RunReport {
        n: stats.n,
        l_nnz: stats.l_nnz,
        iterations: iters,
        fill_us: per_iter(timings.fill),
        factor_us: per_iter(timings.factor),
        solve_us: per_iter(timings.solve) / solves.max(1) as f64,
        worst_residual,
        sign_flips,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", stats);
        println!("fill_kkt:   {:>10.2} us/iter", report.fill_us);
        println!("ldl_factor: {:>10.2} us/iter", report.factor_us);
        println!("solve:      {:>10.2} us/solve", report.solve_us);
        println!("worst residual: {:.3e}", report.worst_residual);
        println!("sign flips:     {}", report.sign_flips);
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Command::Plan { problem, ordering, dense, output } => {
            cmd_plan(problem, *ordering, *dense, output.as_deref())
        }
        Command::Orderings { problem } => cmd_orderings(problem),
        Command::Run {
            problem,
            ordering,
            plan,
            iters,
            solves,
            reg,
            refine_steps,
            json,
        } => cmd_run(
            problem,
            *ordering,
            plan.as_deref(),
            *iters,
            *solves,
            *reg,
            *refine_steps,
            *json,
        ),
    }
}
