#![forbid(unsafe_code)]

mod cli;
mod startup;

use anyhow::Result;
use cli::Command;
use domain::dscp::entity::IpFamily;

fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command {
        Some(Command::Version) => {
            println!("dscp-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        // No subcommand = check
        Some(Command::Check) | None => {
            let rt = startup::run(&cli)?;
            println!(
                "config ok: enabled={} ipv4_policies={} ipv6_policies={} workers={}",
                rt.service.enabled(),
                rt.service.policy_count(IpFamily::V4),
                rt.service.policy_count(IpFamily::V6),
                rt.workers.len(),
            );
            Ok(())
        }
    }
}
