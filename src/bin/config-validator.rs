//! # Chatbot Configuration Validator
//!
//! Command-line tool for validating layered chatbot configuration before a
//! service starts. Loads `default.toml`, the environment file and `CHATBOT__*`
//! variables exactly as the runtime does.

use chatbot_core::config::{ChatbotConfig, ConfigManager, PersistenceBackendKind};
use chatbot_core::recovery::ErrorCategory;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate chatbot configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: $CHATBOT_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate all configuration sections
    All,

    /// Validate and summarize one section
    Component {
        /// Section name (persistence, circuit_breaker, recovery, error_handler, reporting, orchestrator)
        name: String,
    },

    /// Print the fully resolved configuration as JSON (secrets omitted)
    Print,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = load(&cli).and_then(|config| match &cli.command {
        Some(Commands::All) | None => validate_all(&config),
        Some(Commands::Component { name }) => validate_component(&config, name),
        Some(Commands::Print) => print_config(&config),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("❌ {e}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<ChatbotConfig, Box<dyn std::error::Error>> {
    let manager =
        ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)?;
    println!("🔧 Environment: {}", manager.environment());
    println!(
        "📁 Config Directory: {}",
        manager.config_directory().display()
    );
    Ok(manager.config().clone())
}

fn validate_all(config: &ChatbotConfig) -> Result<(), Box<dyn std::error::Error>> {
    for section in SECTIONS {
        validate_component(config, section)?;
    }
    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

const SECTIONS: [&str; 6] = [
    "persistence",
    "circuit_breaker",
    "recovery",
    "error_handler",
    "reporting",
    "orchestrator",
];

fn validate_component(
    config: &ChatbotConfig,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match name.to_lowercase().replace('-', "_").as_str() {
        "persistence" => show_persistence(config),
        "circuit_breaker" | "circuit_breakers" => show_circuit_breaker(config),
        "recovery" => show_recovery(config),
        "error_handler" => show_error_handler(config),
        "reporting" => show_reporting(config),
        "orchestrator" | "state_machine" => show_orchestrator(config),
        _ => return Err(format!("Unknown component: {name}").into()),
    }
    Ok(())
}

fn show_persistence(config: &ChatbotConfig) {
    let persistence = &config.persistence;
    println!("\n💾 Persistence");
    println!("   ✅ Backend: {:?}", persistence.backend);
    match (&persistence.backend, &persistence.database_url) {
        (PersistenceBackendKind::Memory, _) => {
            println!("   ℹ️  Snapshots are kept in process memory")
        }
        (_, Some(_)) => println!("   ✅ Database URL configured"),
        (_, None) => println!("   ℹ️  No database URL; auto mode will use memory"),
    }
    println!("   ✅ Table: {}", persistence.table_name);
    println!("   ✅ TTL: {}s", persistence.ttl_secs);
}

fn show_circuit_breaker(config: &ChatbotConfig) {
    let breaker = &config.circuit_breaker;
    println!("\n⚡ Circuit Breakers");
    println!(
        "   ✅ Defaults: threshold {}, recovery {}ms, half-open calls {}",
        breaker.failure_threshold, breaker.recovery_timeout_ms, breaker.half_open_max_calls
    );
    let mut keys: Vec<&String> = breaker.component_overrides.keys().collect();
    keys.sort();
    for key in keys {
        let resolved = breaker.config_for(key);
        println!(
            "   ✅ {key}: threshold {}, recovery {:?}",
            resolved.failure_threshold, resolved.recovery_timeout
        );
    }
}

fn show_recovery(config: &ChatbotConfig) {
    println!("\n🔁 Recovery");
    let resolver = config.recovery.resolver();
    for category in ErrorCategory::ALL {
        let policy = resolver.resolve(category, None);
        println!(
            "   ✅ {category}: {} attempts, {}",
            policy.max_attempts, policy.strategy
        );
    }
    let mut operations: Vec<&String> = config.recovery.operation_policies.keys().collect();
    operations.sort();
    for operation in operations {
        println!("   ✅ Override for operation '{operation}'");
    }
}

fn show_error_handler(config: &ChatbotConfig) {
    let handler = &config.error_handler;
    println!("\n🛟 Error Handler");
    println!("   ✅ Pattern threshold: {}", handler.pattern_threshold);
    println!(
        "   ✅ Pattern window: {}s (tracking up to {} signatures)",
        handler.pattern_window_secs, handler.max_tracked_patterns
    );
    for category in ErrorCategory::ALL {
        let source = if handler.category_messages.contains_key(&category) {
            "custom"
        } else {
            "default"
        };
        println!("   ✅ {category} message: {source}");
    }
}

fn show_reporting(config: &ChatbotConfig) {
    let reporting = &config.reporting;
    println!("\n📮 Error Reporting");
    if !reporting.enabled {
        println!("   ℹ️  Reporting disabled");
        return;
    }
    match &reporting.endpoint {
        Some(endpoint) => println!("   ✅ Endpoint: {endpoint}"),
        None => println!("   ℹ️  No endpoint; reports are logged"),
    }
    println!(
        "   ✅ Token: {}",
        if reporting.api_token.is_some() { "set" } else { "not set" }
    );
    println!(
        "   ✅ Queue {} / batch {} / every {}s",
        reporting.max_queue_size, reporting.batch_size, reporting.flush_interval_secs
    );
}

fn show_orchestrator(config: &ChatbotConfig) {
    println!("\n🎼 Orchestrator");
    println!(
        "   ✅ Operation timeout: {}ms",
        config.orchestrator.operation_timeout_ms
    );
    println!(
        "   ✅ Persist transitions: {}",
        config.orchestrator.persist_transitions
    );
    println!(
        "   ✅ Conversation max age: {}s, cleanup every {}s",
        config.state_machine.max_conversation_age_secs, config.state_machine.cleanup_interval_secs
    );
}

fn print_config(config: &ChatbotConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
