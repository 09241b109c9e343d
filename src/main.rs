use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;

use automail::campaign::{CampaignLog, Dispatcher, ReplyPolicy};
use automail::config::{CampaignConfig, DEFAULT_ARCHIVE_FOLDER, DEFAULT_LOG_PATH};
use automail::directory;
use automail::error::ConfigError;
use automail::transport::{EmailConfig, EmailTransport};

/// Send templated emails to a list of addressees, check for replies, and
/// remind those who have not answered.
///
/// Operations run in the order send, check, remind whatever the flag order.
#[derive(Debug, Parser)]
#[command(name = "automail", version)]
struct Args {
    /// Template file; repeat to concatenate several (needed for send and remind)
    #[arg(short, long, value_name = "FILE")]
    template: Vec<PathBuf>,

    /// JSON addressee list; repeat to concatenate several (needed for send)
    #[arg(short, long, value_name = "FILE")]
    addressees: Vec<PathBuf>,

    /// Mail folder replies are moved into
    #[arg(short, long, default_value = DEFAULT_ARCHIVE_FOLDER)]
    folder: String,

    /// Campaign log file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_LOG_PATH)]
    log: PathBuf,

    /// Base directory for relative `++` inclusion paths
    #[arg(long, value_name = "DIR")]
    include_dir: Option<PathBuf>,

    /// Send the template to every addressee
    #[arg(short, long)]
    send: bool,

    /// Record replies to logged messages that have none yet
    #[arg(short, long)]
    check: bool,

    /// Check every logged message, appending further reply times
    #[arg(long)]
    recheck: bool,

    /// Send the template as a reminder to every message without a reply
    #[arg(short, long)]
    remind: bool,

    /// Print rendered messages instead of sending or logging
    #[arg(short, long)]
    debug: bool,

    /// Display name on outgoing mail
    #[arg(short, long, env = "AUTOMAIL_USERNAME")]
    username: Option<String>,

    /// Mail account used to log in
    #[arg(long, env = "AUTOMAIL_ACCOUNT")]
    account: Option<String>,

    /// Mail account password
    #[arg(short, long)]
    password: Option<String>,

    /// Read the password from this environment variable
    #[arg(long, value_name = "VAR")]
    passvar: Option<String>,

    /// Send bodies as HTML with explicit line breaks
    #[arg(long)]
    html: bool,
}

impl Args {
    fn email_config(&self) -> Result<EmailConfig, ConfigError> {
        let mut config = EmailConfig::from_env();
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(account) = &self.account {
            config.account = account.clone();
        }
        if let Some(password) = &self.password {
            config.password = SecretString::from(password.clone());
        }
        if let Some(var) = &self.passvar {
            let password = std::env::var(var).map_err(|_| ConfigError::MissingRequired {
                key: var.clone(),
                hint: "The --passvar environment variable is not set.".into(),
            })?;
            config.password = SecretString::from(password);
        }
        config.html |= self.html;
        Ok(config)
    }

    fn needs_template(&self) -> bool {
        self.send || self.remind
    }
}

async fn read_templates(paths: &[PathBuf]) -> Result<String, ConfigError> {
    let mut template = String::new();
    for path in paths {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        template.push_str(&text);
    }
    Ok(template)
}

fn require(present: bool, key: &str, hint: &str) -> Result<(), ConfigError> {
    if present {
        Ok(())
    } else {
        Err(ConfigError::MissingRequired {
            key: key.into(),
            hint: hint.into(),
        })
    }
}

fn print_previews(previews: &[String]) {
    for preview in previews {
        println!("Message:\n{preview}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    if !(args.send || args.check || args.recheck || args.remind) {
        eprintln!("Nothing to do: pass --send, --check, --recheck or --remind (see --help).");
        return Ok(());
    }

    // ── Inputs: everything fatal is checked before any side effect ──────
    if args.needs_template() {
        require(
            !args.template.is_empty(),
            "template",
            "Pass --template FILE for send and remind.",
        )?;
    }
    if args.send {
        require(
            !args.addressees.is_empty(),
            "addressees",
            "Pass --addressees FILE for send.",
        )?;
    }

    let template = read_templates(&args.template).await?;
    let addressees = directory::load_sources(&args.addressees).await?;

    let email_config = args.email_config()?;
    if !args.debug {
        email_config.validate()?;
    }

    let mut log = CampaignLog::load(&args.log).await?;

    eprintln!("📬 automail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Log: {} ({} entries)", log.path().display(), log.len());
    if args.debug {
        eprintln!("   Debug: nothing will be sent or logged");
    } else {
        eprintln!(
            "   Account: {} (SMTP: {}, IMAP: {})",
            email_config.sender_address(),
            email_config.smtp_host,
            email_config.imap_host
        );
    }

    let config = CampaignConfig {
        log_path: args.log.clone(),
        archive_folder: args.folder.clone(),
        debug: args.debug,
        include_dir: args.include_dir.clone(),
    };
    let dispatcher = Dispatcher::new(Arc::new(EmailTransport::new(email_config)), config);

    // ── Operations ─────────────────────────────────────────────────────
    if args.send {
        let report = dispatcher.send(&template, &addressees, &mut log).await?;
        print_previews(&report.previews);
        println!(
            "Sent {} of {} messages ({} failed)",
            report.delivered,
            addressees.len(),
            report.failed
        );
    }

    if args.check || args.recheck {
        let policy = if args.recheck {
            ReplyPolicy::Recheck
        } else {
            ReplyPolicy::FirstMatchOnly
        };
        let report = dispatcher.check(&mut log, policy).await?;
        for key in &report.previews {
            println!("Would check: {key}");
        }
        for reply in &report.replies {
            println!("Reply:\n{}", reply.text);
        }
        println!(
            "Checked {} messages: {} new replies, {} failed",
            report.checked, report.replied, report.failed
        );
    }

    if args.remind {
        let report = dispatcher.remind(&template, &mut log).await?;
        print_previews(&report.previews);
        println!(
            "Sent {} reminders ({} failed)",
            report.reminded, report.failed
        );
    }

    Ok(())
}
