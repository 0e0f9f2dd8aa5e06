use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;
use steward_core::checkpoint::CheckpointStore;

#[derive(Subcommand)]
pub enum CheckpointSubcommand {
    /// Show processed ids and cursor for a source
    Show {
        #[arg(long)]
        source: String,
    },

    /// Forget every processed id for a source
    Reset {
        #[arg(long)]
        source: String,
    },
}

pub fn run(root: &Path, subcommand: CheckpointSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        CheckpointSubcommand::Show { source } => {
            let store = CheckpointStore::load(root, &source)?;
            if json {
                return print_json(store.record());
            }
            let record = store.record();
            println!("source:    {}", store.source());
            println!("processed: {}", store.len());
            println!(
                "cursor:    {}",
                record.last_cursor.as_deref().unwrap_or("-")
            );
            println!(
                "last run:  {}",
                record
                    .last_run
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            Ok(())
        }
        CheckpointSubcommand::Reset { source } => {
            let mut store = CheckpointStore::load(root, &source)?;
            let forgotten = store.len();
            store.reset()?;
            if json {
                print_json(&serde_json::json!({ "source": source, "forgotten": forgotten }))?;
            } else {
                println!("reset {source}: forgot {forgotten} ids");
            }
            Ok(())
        }
    }
}
