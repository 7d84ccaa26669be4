use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use chalkline::facade::{Mutation, Resources};
use chalkline::model::{ItemId, RemoteConfig, Session, item_id};
use chalkline::remote::{RemoteClient, RequestError};
use chalkline::store::LocalStore;

#[derive(Parser)]
#[command(name = "chalkline")]
#[command(about = "Course platform client with an offline pending-change overlay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a client directory (.chalkline)
    Init {
        /// Re-initialize if .chalkline already exists
        #[arg(long)]
        force: bool,
        /// Path to initialize (defaults to current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Store the service URL and credential
    Login {
        /// Base URL of the course service
        #[arg(long)]
        url: String,
        /// Bearer token
        #[arg(long)]
        token: String,
        /// Role to record alongside the credential
        #[arg(long)]
        role: Option<String>,
    },

    /// Clear the stored credential
    Logout,

    /// Show the authenticated identity
    Whoami {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// List a resource collection with pending changes overlaid
    List {
        resource: String,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Create an item
    Create {
        resource: String,
        /// Item fields as a JSON object
        #[arg(long)]
        data: String,
    },

    /// Update fields of an item
    Update {
        resource: String,
        id: String,
        /// Changed fields as a JSON object
        #[arg(long)]
        data: String,
    },

    /// Delete an item
    Delete { resource: String, id: String },

    /// Upload a file to a resource endpoint
    Upload {
        resource: String,
        file: PathBuf,
        /// Extra form fields, key=value (repeatable)
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },

    /// Show recorded pending operations
    Pending {
        resource: Option<String>,
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Discard recorded pending operations for a resource
    ClearPending { resource: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force, path } => {
            let root = match path {
                Some(p) => p,
                None => std::env::current_dir().context("resolve current directory")?,
            };
            LocalStore::init(&root, force)?;
            println!(
                "initialized {}",
                LocalStore::chalkline_dir(&root).display()
            );
            Ok(())
        }
        Commands::Login { url, token, role } => login(&url, token, role),
        Commands::Logout => {
            let store = open_store()?;
            store.clear_session()?;
            println!("logged out");
            Ok(())
        }
        Commands::Whoami { json } => whoami(json),
        Commands::List { resource, json } => list(&resource, json),
        Commands::Create { resource, data } => {
            let item = parse_object(&data)?;
            let resources = open_resources()?;
            report(resources.create(&resource, item)?);
            Ok(())
        }
        Commands::Update { resource, id, data } => {
            let patch = parse_object(&data)?;
            let resources = open_resources()?;
            report(resources.update(&resource, &ItemId(id), patch)?);
            Ok(())
        }
        Commands::Delete { resource, id } => {
            let resources = open_resources()?;
            report(resources.delete(&resource, &ItemId(id))?);
            Ok(())
        }
        Commands::Upload {
            resource,
            file,
            fields,
        } => upload(&resource, &file, &fields),
        Commands::Pending { resource, json } => pending(resource.as_deref(), json),
        Commands::ClearPending { resource } => {
            let store = open_store()?;
            store.clear_pending(&resource)?;
            println!("cleared pending operations for {resource}");
            Ok(())
        }
    }
}

fn open_store() -> Result<LocalStore> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    LocalStore::open(&cwd)
}

fn remote_config(store: &LocalStore) -> Result<RemoteConfig> {
    store
        .read_config()?
        .remote
        .context("no remote configured (run `chalkline login --url ... --token ...`)")
}

fn open_resources() -> Result<Resources> {
    let store = open_store()?;
    let remote = remote_config(&store)?;
    let client = RemoteClient::new(remote, store.clone())?;
    Ok(Resources::new(client, store))
}

fn login(url: &str, token: String, role: Option<String>) -> Result<()> {
    let store = open_store()?;

    let mut cfg = store.read_config()?;
    let remote = match cfg.remote.take() {
        // Keep record_only when re-logging into the same service.
        Some(existing) if existing.base_url == url => existing,
        _ => RemoteConfig::new(url),
    };
    cfg.remote = Some(remote.clone());
    store.write_config(&cfg)?;
    store.set_session(&Session { token, role })?;

    // Verify the credential when the service is reachable; being offline is
    // not a login failure.
    let client = RemoteClient::new(remote, store.clone())?;
    match client.get("/whoami") {
        Ok(payload) => {
            if let Some(v) = payload.into_json() {
                let user = v.get("user").and_then(Value::as_str).unwrap_or("unknown");
                println!("logged in as {user}");
            } else {
                println!("logged in");
            }
        }
        Err(err) if err.is_connectivity() => {
            println!("logged in (could not verify: {err})");
        }
        Err(err) => return Err(err).context("verify credential"),
    }
    Ok(())
}

fn whoami(json: bool) -> Result<()> {
    let store = open_store()?;
    let remote = remote_config(&store)?;
    let client = RemoteClient::new(remote, store)?;
    let v: Value = client
        .get("/whoami")
        .map_err(hint_relogin)?
        .decode()
        .context("decode whoami")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&v)?);
    } else {
        let user = v.get("user").and_then(Value::as_str).unwrap_or("unknown");
        match v.get("role").and_then(Value::as_str) {
            Some(role) => println!("{user} ({role})"),
            None => println!("{user}"),
        }
    }
    Ok(())
}

fn list(resource: &str, json: bool) -> Result<()> {
    let resources = open_resources()?;
    let items = resources.list(resource).map_err(|err| {
        let expired = err
            .downcast_ref::<RequestError>()
            .is_some_and(RequestError::is_auth_expired);
        if expired {
            err.context("session expired (run `chalkline login`)")
        } else {
            err
        }
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    for item in &items {
        let id = item_id(item).map(|i| i.0).unwrap_or_else(|| "-".to_string());
        let provisional = item
            .get("provisional")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let marker = if provisional { " (pending)" } else { "" };
        println!("{id}{marker} {}", serde_json::to_string(item)?);
    }
    Ok(())
}

fn upload(resource: &str, file: &std::path::Path, fields: &[(String, String)]) -> Result<()> {
    let store = open_store()?;
    let remote = remote_config(&store)?;
    let client = RemoteClient::new(remote, store)?;

    let bytes = std::fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|s| s.to_str())
        .context("file has no usable name")?;

    let payload = client
        .upload(&format!("/{resource}/upload"), file_name, bytes, fields)
        .map_err(hint_relogin)?;
    match payload.into_json() {
        Some(v) => println!("{}", serde_json::to_string_pretty(&v)?),
        None => println!("uploaded {file_name}"),
    }
    Ok(())
}

fn pending(resource: Option<&str>, json: bool) -> Result<()> {
    let store = open_store()?;
    let names = match resource {
        Some(r) => vec![r.to_string()],
        None => store.pending_resources()?,
    };

    if json {
        let mut out = serde_json::Map::new();
        for name in &names {
            out.insert(name.clone(), serde_json::to_value(store.pending(name)?)?);
        }
        println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
        return Ok(());
    }

    for name in &names {
        let ops = store.pending(name)?;
        if ops.is_empty() {
            continue;
        }
        println!("{name}:");
        for op in &ops {
            println!(
                "  {} {} {}",
                format_millis(op.recorded_at)?,
                op.kind,
                serde_json::to_string(&op.item)?
            );
        }
    }
    Ok(())
}

fn report(outcome: Mutation) {
    match outcome {
        Mutation::Applied(Some(v)) => {
            println!("applied {}", serde_json::to_string(&v).unwrap_or_default());
        }
        Mutation::Applied(None) => println!("applied"),
        Mutation::Recorded(op) => {
            println!(
                "recorded locally (pending {} at {})",
                op.kind,
                format_millis(op.recorded_at).unwrap_or_default()
            );
        }
    }
}

fn format_millis(millis: i64) -> Result<String> {
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .context("timestamp out of range")?;
    ts.format(&time::format_description::well_known::Rfc3339)
        .context("format timestamp")
}

fn hint_relogin(err: RequestError) -> anyhow::Error {
    if err.is_auth_expired() {
        anyhow::Error::from(err).context("session expired (run `chalkline login`)")
    } else {
        err.into()
    }
}

fn parse_object(data: &str) -> Result<Value> {
    let v: Value = serde_json::from_str(data).context("parse --data as JSON")?;
    if !v.is_object() {
        anyhow::bail!("--data must be a JSON object");
    }
    Ok(v)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("invalid field {s:?} (expected key=value)")),
    }
}
