use std::sync::Arc;

use bjs_session::config::{self, AppConfig};
use bjs_session::ops;
use bjs_session::ops::metrics::Metrics;
use bjs_session::orders::{Order, OrderStatus};
use bjs_session::store::{ConfigStore, Credentials, JsonFileStore, PanelSettings};
use bjs_session::time::format_short;
use bjs_session::{Outcome, PanelClient, PanelError, PanelResult, DEFAULT_PAGE_SIZE};

#[tokio::main]
async fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {err}");
            std::process::exit(1);
        }
    };
    ops::logging::init_with_default(&cfg.infra.log_level);

    let show_metrics = take_flag(&mut args, "--metrics");
    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }
    let command = args.remove(0);
    let metrics = Metrics::new();
    let result = run(&cfg, &command, &args, &metrics).await;
    if show_metrics {
        print!("{}", String::from_utf8_lossy(&metrics.render()));
    }
    if let Err(err) = result {
        tracing::error!(target: "cli", command = %command, error = %err, "command failed");
        eprintln!("{command} failed: {err}");
        std::process::exit(1);
    }
}

/// Removes every occurrence of `flag`, reporting whether it was present.
fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

async fn run(
    cfg: &AppConfig,
    command: &str,
    args: &[String],
    metrics: &Metrics,
) -> PanelResult<()> {
    let store: Arc<dyn ConfigStore> = Arc::new(JsonFileStore::new(&cfg.store.path));
    let settings = PanelSettings::new(store.clone(), cfg.store.keys.clone());

    match command {
        "get-orders" => {
            let opts = OrderArgs::parse(args)?;
            let client = PanelClient::connect(cfg, store, metrics.clone()).await?;
            get_orders(&client, &opts).await
        }
        "reset-session" => {
            let client = PanelClient::new(cfg, store, metrics.clone())?;
            client.reset_session().await?;
            println!("session reset; next command logs in again");
            Ok(())
        }
        "check" => {
            let client = PanelClient::connect(cfg, store, metrics.clone()).await?;
            let state = client.last_auth_state();
            println!("auth state: {state} ({})", state.describe());
            println!(
                "failed attempts: {}",
                client.settings().failed_attempts().await?
            );
            Ok(())
        }
        "services" => {
            let services = settings.services().await?;
            if services.is_empty() {
                println!("no services configured");
            }
            for (index, id) in services.iter().enumerate() {
                println!("{index}: {id}");
            }
            Ok(())
        }
        "enable-login" => {
            settings.reset_failed_attempts().await?;
            settings.enable_login().await?;
            tracing::info!(target: "cli", "panel login enabled; failed attempts reset");
            println!("login enabled");
            Ok(())
        }
        "disable-login" => {
            settings.disable_login().await?;
            println!("login disabled");
            Ok(())
        }
        "set-credentials" => {
            let [username, password] = args else {
                return Err(PanelError::Config(
                    "usage: set-credentials <username> <password>".to_string(),
                ));
            };
            settings
                .set_credentials(&Credentials {
                    username: username.clone(),
                    password: password.clone(),
                })
                .await?;
            settings.invalidate_session().await?;
            println!("credentials stored for {username}");
            Ok(())
        }
        "set-services" => {
            let ids = args
                .iter()
                .map(|raw| {
                    raw.parse::<u64>()
                        .map_err(|_| PanelError::Config(format!("invalid service id: {raw}")))
                })
                .collect::<PanelResult<Vec<u64>>>()?;
            settings.set_services(&ids).await?;
            println!("services: {ids:?}");
            Ok(())
        }
        other => {
            print_usage();
            Err(PanelError::Config(format!("unknown command: {other}")))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OrderArgs {
    service: Option<u64>,
    status: OrderStatus,
    page_size: u32,
}

impl OrderArgs {
    fn parse(args: &[String]) -> PanelResult<Self> {
        let mut opts = Self {
            service: None,
            status: OrderStatus::Pending,
            page_size: DEFAULT_PAGE_SIZE,
        };

        let mut i = 0usize;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--service", Some(v)) => {
                    opts.service = Some(v.parse().map_err(|_| {
                        PanelError::Config(format!("invalid --service value: {v}"))
                    })?);
                    i += 1;
                }
                ("--status", Some(v)) => {
                    opts.status = v.parse()?;
                    i += 1;
                }
                ("--page-size", Some(v)) => {
                    opts.page_size = v.parse().map_err(|_| {
                        PanelError::Config(format!("invalid --page-size value: {v}"))
                    })?;
                    i += 1;
                }
                (flag, _) => {
                    return Err(PanelError::Config(format!("unexpected argument: {flag}")));
                }
            }
            i += 1;
        }
        Ok(opts)
    }
}

async fn get_orders(client: &PanelClient, opts: &OrderArgs) -> PanelResult<()> {
    let state = client.last_auth_state();
    println!("auth state: {state} ({})", state.describe());

    let services = match opts.service {
        Some(id) => vec![id],
        None => client.services().await?,
    };
    if services.is_empty() {
        println!("no services configured; pass --service or run set-services");
        return Ok(());
    }

    let single = services.len() == 1;
    for service in services {
        match client.list_orders(service, opts.status, opts.page_size).await {
            Ok(Outcome::Done(orders)) => print_orders(service, opts.status, &orders),
            Ok(Outcome::Disabled) => {
                println!("login disabled; no orders fetched");
                return Ok(());
            }
            Err(err) if single => return Err(err),
            Err(err) => {
                tracing::warn!(
                    target: "cli",
                    service,
                    error = %err,
                    "failed to list orders; continuing with next service"
                );
                eprintln!("service {service}: {err}");
            }
        }
    }
    Ok(())
}

fn print_orders(service: u64, status: OrderStatus, orders: &[Order]) {
    println!();
    println!("service {service} / {status}: {} order(s)", orders.len());
    if orders.is_empty() {
        return;
    }
    println!(
        "{:>10}  {:<24}  {:<10}  {:>8}  {:>8}  {:<13}",
        "ID", "Username", "Status", "Start", "Remains", "Date"
    );
    for order in orders {
        let username = order
            .handle()
            .map(|h| format!("@{h}"))
            .unwrap_or_else(|| "-".to_string());
        let label = order
            .order_status()
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>10}  {:<24}  {:<10}  {:>8}  {:>8}  {:<13}",
            order.id,
            username,
            label,
            display_opt(order.start_count),
            display_opt(order.remains),
            order.created().map_or_else(|| "-".to_string(), format_short),
        );
    }
}

fn display_opt(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn print_usage() {
    eprintln!(
        "usage:\n  \
         bjs get-orders [--service <id>] [--status <0-7|label>] [--page-size <n>]\n  \
         bjs check\n  \
         bjs reset-session\n  \
         bjs services\n  \
         bjs set-services <id>...\n  \
         bjs set-credentials <username> <password>\n  \
         bjs enable-login\n  \
         bjs disable-login\n\n\
         add --metrics to any command to print prometheus metrics afterwards\n\
         config: BJS_CONFIG_PATH=<file.toml|file.json>, env overrides BJS_<SECTION>__<KEY>"
    );
}
