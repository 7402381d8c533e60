use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use lbkit_api::{Api, ApplyRun, Outcome, TxnCommand};
use lbkit_core::{ConnectionConfig, Error, ErrorReport, FieldMap, Json};
use metrics::counter;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lbctl", version, about = "Load-balancer appliance configuration")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    conn: ConnArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ConnArgs {
    /// Device endpoint: sim://<state file> or mem://
    #[arg(long = "server", env = "LBKIT_SERVER", global = true, default_value = "mem://")]
    server: String,
    #[arg(long = "user", env = "LBKIT_USER", global = true, default_value = "admin")]
    user: String,
    #[arg(long = "password", env = "LBKIT_PASSWORD", global = true, hide_env_values = true, default_value = "")]
    password: String,
    #[arg(long = "https-port", env = "LBKIT_HTTPS_PORT", global = true, default_value_t = ConnectionConfig::DEFAULT_HTTPS_PORT)]
    https_port: u16,
    #[arg(long = "ssh-port", env = "LBKIT_SSH_PORT", global = true, default_value_t = ConnectionConfig::DEFAULT_SSH_PORT)]
    ssh_port: u16,
    #[arg(long = "validate-certs", env = "LBKIT_VALIDATE_CERTS", global = true, action = ArgAction::Set, default_value_t = true)]
    validate_certs: bool,
    /// Device call timeout in seconds
    #[arg(long = "timeout", env = "LBKIT_TIMEOUT", global = true, default_value_t = 20)]
    timeout: u64,
}

impl ConnArgs {
    fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.server.as_str(), self.user.as_str(), self.password.as_str())
            .with_https_port(self.https_port)
            .with_ssh_port(self.ssh_port)
            .with_validate_certs(self.validate_certs)
            .with_timeout(Duration::from_secs(self.timeout))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List built-in object types
    Types,
    /// Show the input contract of an object type
    Schema {
        /// Object type, e.g. "server" or "l7_content_class"
        object: String,
    },
    /// Reconcile every document of a YAML/JSON file ("-" reads stdin)
    Apply {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Run a transaction command (apply, commit, commit_save, save, diff, ...)
    Config {
        command: String,
    },
    /// Run a management operation
    Mng {
        /// Operation name; omit with --list
        operation: Option<String>,
        /// Capability providing the operation
        #[arg(long = "capability", default_value = "device")]
        capability: String,
        /// Operation argument as key=value (repeatable)
        #[arg(long = "arg", value_parser = parse_kv)]
        args: Vec<(String, String)>,
        /// List operations and their arguments
        #[arg(long = "list", action = ArgAction::SetTrue)]
        list: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Types => "types",
            Self::Schema { .. } => "schema",
            Self::Apply { .. } => "apply",
            Self::Config { .. } => "config",
            Self::Mng { .. } => "mng",
        }
    }
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got `{}`", s)),
    }
}

fn init_tracing() {
    let env = std::env::var("LBKIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("LBKIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid LBKIT_METRICS_ADDR; expected host:port");
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    counter!("cli_commands", 1u64, "command" => cli.command.name());

    match &cli.command {
        Commands::Types => {
            let types = Api::object_types()?;
            match cli.output {
                Output::Human => {
                    println!("{:<20} {:<20} {:<7} APPEND", "TYPE", "IDENTITY", "FIELDS");
                    for t in types {
                        println!("{:<20} {:<20} {:<7} {}", t.name, t.identity.join(","), t.fields, if t.appendable { "yes" } else { "-" });
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&types)?),
            }
        }
        Commands::Schema { object } => {
            info!(object = %object, "schema invoked");
            let schema = match Api::schema(object) {
                Ok(s) => s,
                Err(e) => fail(cli.output, &e),
            };
            match cli.output {
                Output::Human => {
                    println!("{}", schema.type_name);
                    for f in schema.iter() {
                        let mut flags = Vec::new();
                        if f.identity { flags.push("identity".to_string()); }
                        if f.required && !f.identity { flags.push("required".to_string()); }
                        if f.sensitive { flags.push("secret".to_string()); }
                        if let Some(d) = &f.default { flags.push(format!("default={}", d)); }
                        println!("  {:<26} {:<40} {}", f.name, f.kind.label(), flags.join(" "));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&*schema)?),
            }
        }
        Commands::Apply { file } => {
            let text = read_input(file)?;
            let mut api = connect(&cli)?;
            let run = match api.reconcile_text(&text) {
                Ok(r) => r,
                Err(e) => fail(cli.output, &e),
            };
            print_run(cli.output, &run)?;
            if let Some(report) = &run.error {
                error!(kind = report.kind, "apply stopped at a failed document");
                std::process::exit(1);
            }
        }
        Commands::Config { command } => {
            let command = TxnCommand::from_str(command).map_err(|bad| {
                let known: Vec<&str> = TxnCommand::ALL.iter().map(|c| c.as_str()).collect();
                anyhow!("unknown config command `{}` (expected one of: {})", bad, known.join(", "))
            })?;
            let mut api = connect(&cli)?;
            match api.config(command) {
                Ok(o) => print_outcome(cli.output, &o)?,
                Err(e) => fail(cli.output, &e),
            }
        }
        Commands::Mng { operation, capability, args, list } => {
            let mut api = connect(&cli)?;
            if *list || operation.is_none() {
                let ops = api.operations();
                match cli.output {
                    Output::Human => {
                        for o in ops {
                            println!("{:<8} {:<34} {:<44} {}", o.capability, o.operation, o.summary, o.arguments.join(" "));
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&ops)?),
                }
                return Ok(());
            }
            let operation = operation.as_deref().unwrap_or_default();
            let supplied: FieldMap = args.iter().map(|(k, v)| (k.clone(), Json::String(v.clone()))).collect();
            info!(capability = %capability, operation, args = supplied.len(), "mng invoked");
            match api.manage(capability, operation, &supplied) {
                Ok(o) => print_outcome(cli.output, &o)?,
                Err(e) => fail(cli.output, &e),
            }
        }
    }

    Ok(())
}

fn connect(cli: &Cli) -> Result<Api> {
    let config = cli.conn.config();
    Api::connect(config.clone()).with_context(|| format!("connecting to {}", config.endpoint()))
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file))
    }
}

/// Print the error report and exit non-zero.
fn fail(output: Output, e: &Error) -> ! {
    let report = e.report();
    match output {
        Output::Human => eprint!("{}", render_report(&report)),
        Output::Json => println!("{}", serde_json::to_string_pretty(&report).unwrap_or_else(|_| report.message.clone())),
    }
    std::process::exit(1);
}

fn render_report(r: &ErrorReport) -> String {
    let mut out = format!("error [{}]: {}\n", r.kind, r.message);
    if let Some(s) = &r.secondary {
        out.push_str(&format!("  also: {}\n", s));
    }
    out
}

fn print_run(output: Output, run: &ApplyRun) -> Result<()> {
    match output {
        Output::Human => {
            for o in &run.results {
                print!("{}", render_outcome(o));
            }
            if let Some(r) = &run.error {
                eprint!("{}", render_report(r));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(run)?),
    }
    Ok(())
}

fn print_outcome(output: Output, o: &Outcome) -> Result<()> {
    match output {
        Output::Human => print!("{}", render_outcome(o)),
        Output::Json => println!("{}", serde_json::to_string_pretty(o)?),
    }
    Ok(())
}

fn render_outcome(o: &Outcome) -> String {
    let mut out = format!("{} {}\n", if o.changed { "changed:" } else { "ok:" }, o.status);
    if let Some(Json::Array(lines)) = &o.diff {
        for l in lines {
            out.push_str(&format!("  {}\n", render_change(l)));
        }
    }
    if let Some(obj) = &o.object {
        if let Ok(pretty) = serde_json::to_string_pretty(obj) {
            for l in pretty.lines() {
                out.push_str(&format!("  {}\n", l));
            }
        }
    }
    if let Some(p) = &o.pending {
        out.push_str(&format!("pending: apply={} save={}\n", p.pending_apply, p.pending_save));
    }
    out
}

fn render_change(c: &Json) -> String {
    match c {
        Json::String(s) => s.clone(),
        Json::Object(m) => {
            let field = m.get("field").and_then(Json::as_str).unwrap_or("?");
            let show = |k: &str| m.get(k).map(|v| v.to_string()).unwrap_or_else(|| "-".into());
            match m.get("kind").and_then(Json::as_str) {
                Some("added") => format!("+ {} = {}", field, show("after")),
                Some("removed") => format!("- {} (was {})", field, show("before")),
                _ => format!("~ {}: {} -> {}", field, show("before"), show("after")),
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kv_arguments() {
        assert_eq!(parse_kv("version=34.1").unwrap(), ("version".to_string(), "34.1".to_string()));
        assert_eq!(parse_kv("path=a=b").unwrap().1, "a=b");
        assert!(parse_kv("=x").is_err());
        assert!(parse_kv("novalue").is_err());
    }

    #[test]
    fn changes_render_per_kind() {
        assert_eq!(render_change(&json!({"field": "weight", "kind": "updated", "before": 1, "after": 4})), "~ weight: 1 -> 4");
        assert_eq!(render_change(&json!({"field": "name", "kind": "added", "after": "web"})), "+ name = \"web\"");
        assert_eq!(render_change(&json!("+ server[index=r1]")), "+ server[index=r1]");
    }

    #[test]
    fn connection_flags() {
        let cli = Cli::try_parse_from(["lbctl", "--server", "sim:///tmp/lb.json", "--timeout", "5", "config", "diff"]).unwrap();
        let cfg = cli.conn.config();
        assert_eq!(cfg.endpoint(), "sim:///tmp/lb.json");
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert!(cfg.validate_certs());
        assert!(matches!(cli.command, Commands::Config { .. }));

        let cli = Cli::try_parse_from(["lbctl", "mng", "software_install", "--arg", "version=1", "--arg", "state=activated"]).unwrap();
        match cli.command {
            Commands::Mng { args, capability, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(capability, "device");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pending_flags_are_rendered() {
        let o = Outcome {
            status: "server [index=r1] created".into(),
            changed: true,
            object: None,
            diff: Some(json!([{"field": "weight", "kind": "added", "after": 1}])),
            pending: Some(lbkit_core::Transaction { pending_apply: true, pending_save: false }),
        };
        let text = render_outcome(&o);
        assert!(text.starts_with("changed: server [index=r1] created"));
        assert!(text.contains("+ weight = 1"));
        assert!(text.ends_with("pending: apply=true save=false\n"));
    }
}
