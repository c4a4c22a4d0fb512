use clap::{Parser, Subcommand};

use crate::modules;

pub mod dashboard;
pub mod proxy;

#[derive(Parser)]
#[command(name = "maternal-gateway")]
#[command(about = "OpenMRS gateway and data layer for the maternal health dashboard")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the long-running gateway
    Serve {
        /// Port to listen on (overrides the configured port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Write the configuration file back, with the port applied and without environment values
        #[arg(long)]
        save_config: bool,
    },
    /// Forward a single request, e.g. `invoke GET /api/openmrs/ws/rest/v1/session`
    Invoke {
        method: String,
        url: String,
    },
    /// Load and print the dashboard for a patient
    Dashboard {
        email: String,
    },
    /// Print the pre-eclampsia health advisory for a patient
    Advisory {
        email: String,
    },
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let layers = modules::config::load_config_layers()?;
    let config = &layers.effective;

    match cli.command {
        Commands::Serve { port, save_config } => {
            proxy::serve(layers.clone(), port, save_config).await
        }
        Commands::Invoke { method, url } => {
            let response = proxy::invoke_once(config, &method, &url).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Commands::Dashboard { email } => {
            match dashboard::load_dashboard(config, &email).await? {
                Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                None => println!("User not registered"),
            }
            Ok(())
        }
        Commands::Advisory { email } => {
            let outcome = dashboard::health_advisory(config, &email).await?;
            match outcome {
                dashboard::AdvisoryOutcome::Advisory { message } => println!("{}", message),
                dashboard::AdvisoryOutcome::NotEligible => {
                    println!("No health advisory: patient has no active pre-eclampsia history with aspirin")
                }
                dashboard::AdvisoryOutcome::NotRegistered => println!("User not registered"),
            }
            Ok(())
        }
    }
}
