use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, SubsecRound, Utc};
use clap::{Parser, Subcommand};
use portal_actions::{ActionOrchestrator, ActionRequest, PgPurchaseOrderStore};
use portal_config::LoadedConfig;
use portal_schemas::{NewPurchaseOrder, PoState};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Supplier portal purchase-order CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Purchase-order actions and audit
    Po {
        #[command(subcommand)]
        cmd: PoCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base first, overrides last)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum PoCmd {
    /// Apply one supplier action. Prints the summary JSON, or the error JSON
    /// and exits non-zero.
    Apply {
        #[arg(long)]
        po_id: String,

        /// Owning supplier id
        #[arg(long)]
        owner: Uuid,

        /// Acting user id
        #[arg(long)]
        actor: Uuid,

        /// acknowledge | mark_sent | cancel | add_note | update_delivery_date
        #[arg(long)]
        action: String,

        /// Action payload as a JSON object, e.g. '{"reason":"customer request"}'
        #[arg(long)]
        data: Option<String>,
    },

    /// Print a PO's audit history as JSON Lines, oldest first.
    Audit {
        #[arg(long)]
        po_id: Uuid,

        #[arg(long)]
        owner: Uuid,
    },

    /// Verify the hash chain and replay the history against the current row.
    Verify {
        #[arg(long)]
        po_id: Uuid,

        #[arg(long)]
        owner: Uuid,
    },

    /// Insert a purchase order (order-intake stand-in for dev databases).
    Seed {
        #[arg(long)]
        owner: Uuid,

        #[arg(long)]
        po_number: String,

        #[arg(long, default_value = "Open")]
        state: String,

        /// YYYY-MM-DD
        #[arg(long)]
        delivery_date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let loaded = portal_config::load_from_env()?;
            let pool = connect(&loaded).await?;
            match cmd {
                DbCmd::Status => {
                    let s = portal_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_purchase_orders_table={} has_audit_table={}",
                        s.ok, s.has_purchase_orders_table, s.has_audit_table
                    );
                }
                DbCmd::Migrate => {
                    portal_db::migrate(&pool).await?;
                    info!(config_hash = %loaded.config_hash, "migrations applied");
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = portal_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Po { cmd } => match cmd {
            PoCmd::Apply {
                po_id,
                owner,
                actor,
                action,
                data,
            } => {
                let data = parse_data(data.as_deref())?;
                // Envelope errors are reported before touching the database.
                let req = match ActionRequest::from_json(&json!({
                    "po_id": po_id,
                    "action": action,
                    "data": data,
                })) {
                    Ok(r) => r,
                    Err(e) => {
                        println!("{}", e.to_body());
                        bail!("action rejected: {}", e.code());
                    }
                };

                let loaded = portal_config::load_from_env()?;
                let pool = connect(&loaded).await?;
                let orch = ActionOrchestrator::new(
                    PgPurchaseOrderStore::new(pool),
                    loaded.config.actions.tx_timeout(),
                );
                match orch
                    .apply(req.po_id, owner, actor, req.action, &req.data)
                    .await
                {
                    Ok(summary) => {
                        info!(po_id = %summary.po_id, new_version = summary.new_version, "po apply");
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    }
                    Err(e) => {
                        warn!(po_id = %req.po_id, code = e.code(), "po apply rejected");
                        println!("{}", e.to_body());
                        bail!("action rejected: {}", e.code());
                    }
                }
            }

            PoCmd::Audit { po_id, owner } => {
                let loaded = portal_config::load_from_env()?;
                let pool = connect(&loaded).await?;
                let events = load_history(pool, loaded, po_id, owner).await?;
                print!("{}", portal_audit::to_jsonl(&events)?);
            }

            PoCmd::Verify { po_id, owner } => {
                let loaded = portal_config::load_from_env()?;
                let pool = connect(&loaded).await?;
                let current = portal_db::fetch_po_for_owner(&pool, po_id, owner)
                    .await?
                    .with_context(|| format!("PO_NOT_FOUND po_id={po_id}"))?;
                let events = portal_db::fetch_audit_events(&pool, po_id, owner).await?;

                let report = portal_audit::verify_po_history(&events, &current.snapshot())?;
                println!("events={}", events.len());
                println!("chain={:?}", report.chain);
                match &report.replay {
                    Ok(Some(s)) => println!("replay_version={}", s.version),
                    Ok(None) => println!("replay_version=none"),
                    Err(e) => println!("replay_error={e}"),
                }
                println!("matches_current={}", report.matches_current);
                if !report.is_clean() {
                    bail!("AUDIT_MISMATCH po_id={po_id}");
                }
                println!("verified=true");
            }

            PoCmd::Seed {
                owner,
                po_number,
                state,
                delivery_date,
            } => {
                let state: PoState = state.parse()?;
                let expected_delivery_date = delivery_date
                    .as_deref()
                    .map(|d| NaiveDate::parse_from_str(d, portal_actions::payload::DATE_FORMAT))
                    .transpose()
                    .context("invalid --delivery-date; expected YYYY-MM-DD")?;

                let loaded = portal_config::load_from_env()?;
                let pool = connect(&loaded).await?;
                let po_id = Uuid::new_v4();
                let mut conn = pool.acquire().await.context("acquire connection")?;
                portal_db::insert_purchase_order(
                    &mut conn,
                    &NewPurchaseOrder {
                        po_id,
                        owner_id: owner,
                        po_number,
                        state,
                        version: 0,
                        expected_delivery_date,
                        created_at_utc: Utc::now().trunc_subsecs(6),
                    },
                )
                .await?;
                info!(%po_id, %owner, "po seeded");
                println!("po_id={po_id}");
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn parse_data(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(json!({}));
    };
    let v: Value = serde_json::from_str(raw).context("invalid --data: not JSON")?;
    if !v.is_object() {
        bail!("invalid --data: expected a JSON object");
    }
    Ok(v)
}

async fn connect(loaded: &LoadedConfig) -> Result<PgPool> {
    let db = &loaded.config.database;
    let url = std::env::var(&db.url_env)
        .with_context(|| format!("missing env var {}", db.url_env))?;
    portal_db::connect(&url, db.max_connections, db.acquire_timeout()).await
}

async fn load_history(
    pool: PgPool,
    loaded: LoadedConfig,
    po_id: Uuid,
    owner: Uuid,
) -> Result<Vec<portal_schemas::AuditEvent>> {
    let orch = ActionOrchestrator::new(
        PgPurchaseOrderStore::new(pool),
        loaded.config.actions.tx_timeout(),
    );
    match orch.history(po_id, owner).await {
        Ok(events) => Ok(events),
        Err(e) => {
            println!("{}", e.to_body());
            bail!("audit read rejected: {}", e.code());
        }
    }
}
