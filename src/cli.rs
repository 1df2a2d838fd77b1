use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use flowsentinel::alerts::{summarize_within, Alert, AlertStore, AlertSummary, DEFAULT_RECENT_LIMIT};
use flowsentinel::capture::read_pcap;
use flowsentinel::config::Config;
use flowsentinel::core::{FlowRecord, Severity};
use flowsentinel::flow::aggregate;
use flowsentinel::ml::{ModelStatus, ModelTrainer};
use flowsentinel::pipeline::{AnalysisReport, Analyzer};

#[derive(Parser)]
#[command(name = "flowsentinel")]
#[command(author, version, about = "Flow anomaly detection and threat alerting for packet captures")]
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
    /// Analyse a capture against the trained models
    Analyze {
        /// pcap file to analyse
        pcap: PathBuf,

        /// Evaluate a single model only
        #[arg(short, long)]
        model: Option<String>,

        /// Confidence threshold (0-100) for high-confidence votes
        #[arg(short = 't', long)]
        conf_thresh: Option<f64>,

        /// Print the full report as JSON
        #[arg(short, long)]
        json: bool,

        /// Do not persist the generated alerts
        #[arg(long)]
        no_save: bool,
    },

    /// Train every model family on one or more captures
    Train {
        /// pcap files to train on
        #[arg(required = true)]
        pcaps: Vec<PathBuf>,
    },

    /// Show recently persisted alerts
    Alerts {
        /// Number of alerts to show
        #[arg(short, long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show training scores of the stored models
    Models {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for per-model evaluation
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
    #[tabled(rename = "Mean conf")]
    mean_confidence: f64,
    #[tabled(rename = "Stability %")]
    stability: f64,
    /// Agreement with the majority vote, not ground truth
    #[tabled(rename = "Majority agreement %")]
    accuracy: String,
    #[tabled(rename = "Time (s)")]
    time: f64,
}

/// Table row for alerts
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Pattern")]
    pattern: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Score")]
    score: u8,
    #[tabled(rename = "Description")]
    description: String,
}

/// Table row for training scores
#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Model")]
    name: String,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
    #[tabled(rename = "Separation")]
    separation: f64,
    #[tabled(rename = "Density drop")]
    density_drop: f64,
    #[tabled(rename = "Stability")]
    stability: f64,
    #[tabled(rename = "Strength")]
    strength: f64,
    #[tabled(rename = "Time (s)")]
    time: f64,
}

fn colored_severity(severity: Severity) -> String {
    let s = severity.as_str();
    match severity {
        Severity::Critical => s.red().bold().to_string(),
        Severity::High => s.red().to_string(),
        Severity::Medium => s.yellow().to_string(),
        Severity::Low => s.normal().to_string(),
    }
}

fn alert_rows(alerts: &[Alert]) -> Vec<AlertRow> {
    alerts
        .iter()
        .map(|a| AlertRow {
            time: a.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            severity: colored_severity(a.severity),
            pattern: a.pattern.to_string(),
            source: a.source_address.to_string(),
            destination: a.destination_address.to_string(),
            score: a.threat_score,
            description: a.description.clone(),
        })
        .collect()
}

fn print_summary(summary: &AlertSummary) {
    println!("\n{}", "Alert Summary:".bold());
    println!("  Total:           {}", summary.total);
    println!("  Last hour:       {}", summary.recent_count.to_string().cyan());
    for severity in Severity::ALL.iter().rev() {
        let count = summary.by_severity.get(severity).copied().unwrap_or(0);
        println!("  {:<16} {}", format!("{}:", severity), count);
    }
    for (pattern, count) in &summary.by_pattern {
        println!("  {:<16} {}", format!("{}:", pattern), count);
    }
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            pcap,
            model,
            conf_thresh,
            json,
            no_save,
        } => cmd_analyze(config, pcap, model, conf_thresh, json, no_save),
        Commands::Train { pcaps } => cmd_train(config, pcaps),
        Commands::Alerts { limit, json } => cmd_alerts(config, limit, json),
        Commands::Models { json } => cmd_models(config, json),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn cmd_analyze(
    mut config: Config,
    pcap: PathBuf,
    model: Option<String>,
    conf_thresh: Option<f64>,
    json: bool,
    no_save: bool,
) -> Result<()> {
    if let Some(threshold) = conf_thresh {
        if !(0.0..=100.0).contains(&threshold) {
            bail!("Confidence threshold must be within 0-100, got {}", threshold);
        }
        config.consensus.confidence_threshold = threshold;
    }

    let store = config.alerts.store();
    let mut analyzer = Analyzer::from_config(config);
    if let Some(name) = model {
        analyzer = analyzer.with_only_model(name);
    }

    let report = analyzer
        .analyze_file(&pcap, Utc::now())
        .with_context(|| format!("Failed to analyse {}", pcap.display()))?;

    if !no_save && !report.alerts.is_empty() {
        let batch = store.append(&report.alerts).context("Failed to save alerts")?;
        if !json {
            println!("{} {} alerts as {}", "Saved".green().bold(), report.alerts.len(), batch);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &AnalysisReport) {
    if let Some(message) = &report.message {
        println!("{} {}", "Note:".yellow().bold(), message);
        return;
    }

    let stats = &report.statistics;
    println!("{}", "=== Capture Analysis ===".bold());
    println!();
    println!("Flows:             {}", stats.total_flows);
    println!("Packets:           {}", stats.total_packets);
    println!("Bytes:             {}", stats.total_bytes);
    println!("Avg packets/flow:  {}", stats.avg_packets_per_flow);
    println!("Max packet rate:   {}", stats.max_packet_rate);
    println!(
        "Anomalous flows:   {}",
        report.anomalous_flows().count().to_string().yellow()
    );
    if let Some(name) = &report.verdict_model {
        println!("Verdicts from:     {}", name.cyan());
    }

    if !report.model_evaluations.is_empty() {
        println!("\n{}", "Model Evaluations:".bold());
        let rows: Vec<ModelRow> = report
            .model_evaluations
            .iter()
            .map(|(name, m)| ModelRow {
                name: name.clone(),
                status: match &m.status {
                    ModelStatus::Ok => "ok".green().to_string(),
                    ModelStatus::Failed { error } => format!("{} ({})", "failed".red(), error),
                },
                anomalies: m.metrics.anomalies_detected,
                mean_confidence: m.metrics.mean_confidence,
                stability: m.metrics.stability_pct,
                accuracy: m
                    .metrics
                    .pseudo_accuracy_pct
                    .map_or_else(|| "-".to_string(), |pct| pct.to_string()),
                time: m.metrics.inference_time_sec,
            })
            .collect();
        println!("{}", Table::new(rows));
        println!("Consensus: {:?} ({} voters)", report.consensus.status, report.consensus.voters.len());
    }

    for (name, error) in &report.unavailable_models {
        println!("{} {}: {}", "Unavailable".yellow().bold(), name, error);
    }

    if report.alerts.is_empty() {
        println!("\nNo alerts");
    } else {
        println!("\n{}", "Alerts:".bold());
        println!("{}", Table::new(alert_rows(&report.alerts)));
    }
    print_summary(&report.alert_summary);
}

fn cmd_train(config: Config, pcaps: Vec<PathBuf>) -> Result<()> {
    let mut flows: Vec<FlowRecord> = Vec::new();
    for path in &pcaps {
        let capture = read_pcap(path)?;
        let table = aggregate(&capture.packets);
        println!("{}: {} flows", path.display(), table.len());
        flows.extend(table.flows().iter().cloned());
    }

    let trainer = ModelTrainer::new(config.models.params.clone(), config.features.clone());
    let outcome = trainer.train(&flows)?;

    let store = config.models.store();
    outcome.save(&store)?;

    println!(
        "{} {} models on {} flows into {}",
        "Trained".green().bold(),
        outcome.models.len(),
        flows.len(),
        store.dir().display()
    );
    print_scores(&outcome.reports);
    Ok(())
}

fn print_scores(reports: &std::collections::BTreeMap<String, flowsentinel::ml::TrainingReport>) {
    let rows: Vec<ScoreRow> = reports
        .iter()
        .map(|(name, r)| ScoreRow {
            name: name.clone(),
            anomalies: r.n_anomalies,
            separation: r.anomaly_separation,
            density_drop: r.density_drop,
            stability: r.stability_index,
            strength: r.model_strength,
            time: r.training_time_sec,
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn cmd_alerts(config: Config, limit: usize, json: bool) -> Result<()> {
    let store = config.alerts.store();
    let alerts = store.list_recent(limit).context("Failed to read alerts")?;
    let summary = summarize_within(&alerts, Utc::now(), config.alerts.recent_window());

    if json {
        let value = serde_json::json!({ "alerts": alerts, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if alerts.is_empty() {
        println!("No alerts");
        return Ok(());
    }

    println!("{}", Table::new(alert_rows(&alerts)));
    print_summary(&summary);
    Ok(())
}

fn cmd_models(config: Config, json: bool) -> Result<()> {
    let store = config.models.store();
    let names = store.list_models()?;
    if names.is_empty() {
        println!("No trained models in {}. Run `flowsentinel train` first.", store.dir().display());
        return Ok(());
    }

    let scores = store
        .load_scores()
        .with_context(|| format!("Failed to read model scores in {}", store.dir().display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scores)?);
    } else {
        println!("{} {}", "Models:".bold(), names.join(", "));
        print_scores(&scores);
    }
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();

    match output {
        Some(path) => {
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
