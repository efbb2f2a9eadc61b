//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::TapConfig;
use crate::engine::Message;
use crate::error::{Error, Result};
use crate::state::BookmarkStore;
use crate::stream::StreamSelection;
use crate::streams::{shopify_graph, RegistryOptions};
use crate::tap::Tap;
use futures::StreamExt;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Discover => self.discover(),
            Commands::Streams => self.streams(),
            Commands::Read {
                streams,
                state_output,
                state_per_page,
                continue_on_error,
            } => {
                self.read(
                    streams.as_deref(),
                    state_output.as_deref(),
                    *state_per_page,
                    *continue_on_error,
                )
                .await
            }
        }
    }

    /// Load configuration
    fn load_config(&self) -> Result<TapConfig> {
        let path = self
            .cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Config file not specified (use -c flag)"))?;
        TapConfig::from_file(path)
    }

    /// Load state
    fn load_state(&self) -> Result<BookmarkStore> {
        // Inline state takes precedence
        if let Some(state_json) = &self.cli.state_json {
            BookmarkStore::from_json(state_json)
        } else if let Some(path) = &self.cli.state {
            BookmarkStore::from_file(path)
        } else {
            Ok(BookmarkStore::in_memory())
        }
    }

    /// Print the catalog
    fn discover(&self) -> Result<()> {
        let tap = Tap::new(self.load_config()?)?;
        let catalog = tap.catalog();
        self.output_message(&json!({ "streams": catalog }));
        Ok(())
    }

    /// List stream names; needs no config
    fn streams(&self) -> Result<()> {
        let graph = shopify_graph(&RegistryOptions::default())?;
        let names: Vec<&str> = graph.topological_order().iter().map(|s| s.name.as_str()).collect();
        self.output_message(&json!({
            "type": "STREAMS",
            "streams": names,
        }));
        Ok(())
    }

    /// Read data
    async fn read(
        &self,
        streams: Option<&str>,
        state_output: Option<&Path>,
        state_per_page: bool,
        continue_on_error: bool,
    ) -> Result<()> {
        let sync_start = Instant::now();

        let mut config = self.load_config()?;
        config.emit_state_per_page |= state_per_page;
        if continue_on_error {
            config.fail_fast = false;
        }

        let selection: StreamSelection = streams.unwrap_or_default().parse()?;
        let mut store = self.load_state()?;
        if let Some(path) = state_output {
            store = store.persist_to(path);
        }

        let tap = Tap::new(config)?;
        let mut messages = tap.read(selection, store)?;

        let mut records = 0usize;
        let mut failure = None;
        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => {
                    if message.is_record() {
                        records += 1;
                    }
                    self.output_message(&message.to_json()?);
                }
                Err(e) => failure = Some(e),
            }
        }

        let duration_ms = sync_start.elapsed().as_millis() as u64;
        match failure {
            None => {
                info!("Read {records} record(s) in {duration_ms}ms");
                Ok(())
            }
            Some(e) => {
                warn!("Read {records} record(s) in {duration_ms}ms before failing");
                Err(e)
            }
        }
    }

    /// Output a message to stdout
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}
