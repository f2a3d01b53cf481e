// This file is part of Opvet.
//
// Opvet is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Opvet is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Opvet.
// If not, see https://www.gnu.org/licenses/.

use std::{collections::HashMap, fs, path::PathBuf, process, sync::Arc};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, Bytes};
use opvet_evm::Evm;
use opvet_rpc::{classify_simulation, classify_structure};
use opvet_sim::{
    check_user_op_structure, parse_user_op, InMemoryReputation, ReputationParams,
    SimulationResult, SimulationSettings, Simulator, StructureCheck,
};
use opvet_types::ENTRY_POINT_ADDRESS_V0_7;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Parse the CLI arguments and run the chosen subcommand
pub(crate) fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let opt = Cli::parse();
    tracing::debug!("parsed CLI options: {opt:?}");
    match opt.command {
        Command::Check(args) => check(args),
    }
}

#[derive(Debug, Parser)]
#[command(name = "opvet", about = "ERC-4337 v0.7 user operation admission validator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a user operation for bundle includability
    ///
    /// Runs the structural checks, then simulates the validation phases
    /// against the embedded EVM with the EIP-7562 rules enforced.
    #[command(name = "check")]
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Path to the user operation JSON file
    op: PathBuf,

    /// Path to a JSON object mapping addresses to runtime code, deployed
    /// into the EVM before simulation
    #[arg(long)]
    state: Option<PathBuf>,

    /// Entry point address the validation calls originate from
    #[arg(long)]
    entry_point: Option<Address>,

    /// Validation-rule failures before a factory or paymaster is throttled
    #[arg(long, default_value_t = 2)]
    throttle_threshold: u64,

    /// Validation-rule failures before a factory or paymaster is banned
    #[arg(long, default_value_t = 5)]
    ban_threshold: u64,

    /// Print the outcome as JSON instead of a human-readable report
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    structure: StructureCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation: Option<SimulationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<i32>,
}

fn check(args: CheckArgs) -> anyhow::Result<()> {
    let raw = fs::read_to_string(&args.op)
        .with_context(|| format!("failed to read {}", args.op.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.op.display()))?;

    let structure = check_user_op_structure(&value);
    if !structure.is_valid {
        let code = classify_structure(&structure).map(|error| error.code());
        return finish(
            args.json,
            Report {
                structure,
                simulation: None,
                error_code: code,
            },
        );
    }

    let op = parse_user_op(&value).context("operation failed to parse after passing checks")?;

    let mut evm = Evm::new();
    if let Some(path) = &args.state {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let deployments: HashMap<Address, Bytes> =
            serde_json::from_str(&raw).context("state file must map addresses to hex code")?;
        for (address, code) in deployments {
            evm.state_mut().put_code(address, code);
        }
    }

    let reputation = Arc::new(InMemoryReputation::new(ReputationParams {
        throttle_threshold: args.throttle_threshold,
        ban_threshold: args.ban_threshold,
    }));
    let entry_point = args.entry_point.unwrap_or(ENTRY_POINT_ADDRESS_V0_7);
    let mut simulator = Simulator::new(evm, entry_point, reputation, SimulationSettings::default());
    let simulation = simulator.simulate_validation(&op);
    let error_code = classify_simulation(&simulation).map(|error| error.code());

    finish(
        args.json,
        Report {
            structure,
            simulation: Some(simulation),
            error_code,
        },
    )
}

fn finish(as_json: bool, report: Report) -> anyhow::Result<()> {
    let includable = report.error_code.is_none();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human(&report);
    }
    if !includable {
        process::exit(1);
    }
    Ok(())
}

fn print_human(report: &Report) {
    if !report.structure.is_valid {
        println!("structurally invalid user operation:");
        for error in &report.structure.errors {
            println!("  - {error}");
        }
    }
    if let Some(simulation) = &report.simulation {
        for error in &simulation.errors {
            println!("error: {error}");
        }
        for violation in &simulation.violations {
            println!("violation: {violation}");
        }
        if let Some(gas) = simulation.gas_used {
            println!("validation gas used: {gas}");
        }
        if simulation.is_valid {
            println!("operation is includable");
        }
    }
    if let Some(code) = report.error_code {
        println!("rejected with code {code}");
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
