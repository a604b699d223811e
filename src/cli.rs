use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use netvigil::config::Config;
use netvigil::models::{Detection, NewRule, Rule, Target};
use netvigil::storage::{JsonStore, Store};
use netvigil::{Daemon, Netvigil};

#[derive(Parser)]
#[command(name = "netvigil")]
#[command(author, version, about = "Traffic anomaly detection and honeypot monitoring")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the detection daemon in the foreground
    Run,

    /// Manage detection rules
    Rules {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Show recent detections
    Detections {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Manage honeypot targets
    Targets {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum RuleAction {
    /// List active rules
    List,

    /// Add a rule from a JSON spec
    Add {
        /// Inline JSON spec
        spec: Option<String>,

        /// Read the spec from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Remove a rule by id
    Remove { id: String },
}

#[derive(Subcommand)]
pub enum TargetAction {
    /// List configured targets
    List,

    /// Add a target domain with the ports to probe (replaces an
    /// existing entry for the same domain)
    Add {
        domain: String,

        #[arg(required = true)]
        ports: Vec<u16>,
    },

    /// Remove a target domain
    Remove { domain: String },
}

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Technique")]
    technique: String,
    #[tabled(rename = "Match")]
    kind: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&Rule> for RuleRow {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            technique: rule.technique.clone(),
            kind: rule.match_spec.to_string(),
            created: rule.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Rule")]
    name: String,
    #[tabled(rename = "Technique")]
    technique: String,
    #[tabled(rename = "Source")]
    source: String,
}

impl From<&Detection> for DetectionRow {
    fn from(det: &Detection) -> Self {
        Self {
            time: det.ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            name: det.name.clone(),
            technique: det.technique.clone(),
            source: det.source.clone(),
        }
    }
}

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Ports")]
    ports: String,
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run => {
            let daemon = Daemon::new(Netvigil::new(config));
            daemon.run().await
        }

        Commands::Rules { action } => run_rules(config, action),

        Commands::Detections { limit, json } => {
            let core = Netvigil::new(config);
            let detections = core.list_detections(limit);

            if json {
                println!("{}", serde_json::to_string_pretty(&detections)?);
            } else if detections.is_empty() {
                println!("No detections recorded");
            } else {
                let rows: Vec<DetectionRow> = detections.iter().map(Into::into).collect();
                println!("{}", Table::new(rows));
            }
            Ok(())
        }

        Commands::Targets { action } => run_targets(config, action),

        Commands::GenConfig { output } => {
            let content = toml::to_string_pretty(&Config::default())?;
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Configuration written to {}", path.display());
                }
                None => print!("{content}"),
            }
            Ok(())
        }
    }
}

fn run_rules(config: Config, action: RuleAction) -> Result<()> {
    let mut core = Netvigil::new(config);

    match action {
        RuleAction::List => {
            let rules = core.list_rules();
            if rules.is_empty() {
                println!("No rules configured");
            } else {
                let rows: Vec<RuleRow> = rules.iter().map(Into::into).collect();
                println!("{}", Table::new(rows));
            }
        }

        RuleAction::Add { spec, file } => {
            let raw = match (spec, file) {
                (Some(spec), None) => spec,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                _ => return Err(anyhow!("provide an inline JSON spec or --file, not both")),
            };

            let spec: NewRule = serde_json::from_str(&raw).context("Invalid rule spec")?;
            let rule = core.add_rule(spec)?;
            println!("{} {} ({})", "Added rule".green(), rule.id, rule.name);
        }

        RuleAction::Remove { id } => {
            if core.remove_rule(&id)? {
                println!("{} {}", "Removed rule".green(), id);
            } else {
                println!("{} {}", "No such rule:".yellow(), id);
            }
        }
    }

    Ok(())
}

fn run_targets(config: Config, action: TargetAction) -> Result<()> {
    let store = JsonStore::new(config.data_dir());
    let mut targets = store.load_targets()?;

    match action {
        TargetAction::List => {
            if targets.is_empty() {
                println!("No targets configured");
            } else {
                let rows: Vec<TargetRow> = targets
                    .iter()
                    .map(|t| TargetRow {
                        domain: t.domain.clone(),
                        ports: t
                            .ports
                            .iter()
                            .map(u16::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                println!("{}", Table::new(rows));
            }
        }

        TargetAction::Add { domain, ports } => {
            targets.retain(|t| t.domain != domain);
            targets.push(Target {
                domain: domain.clone(),
                ports,
            });
            store.save_targets(&targets)?;
            println!("{} {}", "Added target".green(), domain);
        }

        TargetAction::Remove { domain } => {
            let before = targets.len();
            targets.retain(|t| t.domain != domain);
            if targets.len() != before {
                store.save_targets(&targets)?;
                println!("{} {}", "Removed target".green(), domain);
            } else {
                println!("{} {}", "No such target:".yellow(), domain);
            }
        }
    }

    Ok(())
}
