use anyhow::{bail, Context as _};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wlm_client::{ActivationService, ControllerAdapter, ControllerApi, HttpActivationClient, HttpTransport};
use wlm_core::{
    activation_token_from_env, credentials_from_env, ConfirmationGate, FileLedgerStore, Inventory,
    InventoryCollector, MigrationConfig, MigrationError, MigrationOrchestrator, ReadinessValidator,
    ResultReporter, RunSummary, ValidationReport,
};
use wlm_model::{ClusterSnapshot, GroupId};

const EXIT_OK: i32 = 0;
const EXIT_JOB_FAILED: i32 = 1;
const EXIT_FATAL: i32 = 2;

fn cli() -> Command {
    let json = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print the result as JSON");

    Command::new("wlm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Migrate AP groups from a controller cluster to cloud management")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .default_value("wlm.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("inventory")
                .about("Query every controller and summarize the cluster")
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("validate")
                .about("Check controller readiness and list candidate groups")
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("migrate")
                .about("Migrate confirmed AP groups")
                .arg(
                    Arg::new("confirm")
                        .long("confirm")
                        .action(ArgAction::Append)
                        .required(true)
                        .help("AP group to migrate (repeatable)"),
                ),
        )
        .subcommand(Command::new("reconcile").about("Resolve jobs left unfinished by a previous run"))
        .subcommand(
            Command::new("status")
                .about("Show job ledger contents")
                .arg(Arg::new("group").long("group").help("Only this AP group")),
        )
        .subcommand(
            Command::new("abort")
                .about("Abandon the controller-side conversion of a failed cutover")
                .arg(Arg::new("group").long("group").required(true)),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Clients and configuration shared by every subcommand
struct Context {
    config: MigrationConfig,
    controllers: Arc<dyn ControllerApi>,
    activation: Arc<dyn ActivationService>,
}

impl Context {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let config = MigrationConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?;
        let transport = HttpTransport::new(config.http.transport())?;
        let controllers = ControllerAdapter::new(transport, credentials_from_env()?, config.retry.clone());
        let activation = HttpActivationClient::new(
            config.activation.base_url.clone(),
            activation_token_from_env()?,
            config.http.transport().request_timeout,
        )?;
        Ok(Self {
            config,
            controllers: Arc::new(controllers),
            activation: Arc::new(activation),
        })
    }

    fn orchestrator(&self) -> anyhow::Result<MigrationOrchestrator> {
        let store = Arc::new(FileLedgerStore::new(self.config.ledger.path.clone()));
        Ok(MigrationOrchestrator::new(
            Arc::clone(&self.controllers),
            Arc::clone(&self.activation),
            store,
            &self.config,
        )?)
    }

    async fn inventory(&self) -> anyhow::Result<Inventory> {
        let collector = InventoryCollector::new(Arc::clone(&self.controllers));
        let inventory = match &self.config.conductor {
            Some(conductor) => collector.collect_from_conductor(conductor).await?,
            None => collector.collect(&self.config.controllers).await?,
        };
        if let Inventory::Partial { unreachable, .. } = &inventory {
            let ids: Vec<String> = unreachable.iter().map(|(id, _)| id.to_string()).collect();
            warn!(
                unreachable = %ids.join(", "),
                "partial inventory, groups on these controllers will be excluded"
            );
        }
        Ok(inventory)
    }

    async fn validate(&self, snapshot: &ClusterSnapshot) -> anyhow::Result<ValidationReport> {
        let validator = ReadinessValidator::new(
            Arc::clone(&self.controllers),
            Arc::clone(&self.activation),
            self.config.min_firmware()?,
        );
        Ok(validator.validate(snapshot).await)
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if let Some(inventory) = &summary.inventory {
        println!(
            "{} controllers ({} unreachable), {} groups, {} access points",
            inventory.controllers,
            inventory.unreachable.len(),
            inventory.groups,
            inventory.access_points
        );
        for (model, count) in &inventory.model_counts {
            println!("  {model:<12} {count}");
        }
    }
    for (controller, failures) in &summary.validation_failures {
        for failure in failures {
            println!("controller {controller}: {failure}");
        }
    }
    if !summary.candidates.is_empty() {
        let names: Vec<_> = summary.candidates.iter().map(ToString::to_string).collect();
        println!("candidate groups: {}", names.join(", "));
    }
    for job in &summary.jobs {
        println!("{} [{:?}] {}", job.group, job.phase, job.breakdown);
        if let Some(failure) = &job.failure {
            println!("  failed in {:?}: {}", failure.phase, failure.message);
        }
    }
}

async fn inventory(ctx: &Context, args: &ArgMatches) -> anyhow::Result<i32> {
    let inventory = ctx.inventory().await?;
    let mut reporter = ResultReporter::new();
    reporter.record_inventory(&inventory);
    if args.get_flag("json") {
        print_json(&reporter.summary().inventory)?;
    } else {
        print_summary(reporter.summary());
    }
    Ok(EXIT_OK)
}

async fn validate(ctx: &Context, args: &ArgMatches) -> anyhow::Result<i32> {
    let inventory = ctx.inventory().await?;
    let report = ctx.validate(inventory.snapshot()).await?;
    let mut reporter = ResultReporter::new();
    reporter.record_inventory(&inventory);
    reporter.record_validation(&report);
    if args.get_flag("json") {
        print_json(reporter.summary())?;
    } else {
        print_summary(reporter.summary());
    }
    Ok(EXIT_OK)
}

async fn migrate(ctx: &Context, args: &ArgMatches) -> anyhow::Result<i32> {
    let requested: Vec<GroupId> = args
        .get_many::<String>("confirm")
        .into_iter()
        .flatten()
        .map(|group| GroupId::new(group.as_str()))
        .collect();

    let orchestrator = ctx.orchestrator()?;
    let inventory = ctx.inventory().await?;
    let mut reporter = ResultReporter::new();
    reporter.record_inventory(&inventory);
    let snapshot = inventory.into_snapshot();

    let report = orchestrator.validator().validate(&snapshot).await;
    reporter.record_validation(&report);

    let mut gate = ConfirmationGate::new();
    gate.propose(&report);
    for group in &requested {
        if !gate.confirm(group) {
            warn!(%group, "group is not a migration candidate, skipping");
        }
    }
    let confirmations = gate.take_all_confirmed();
    if confirmations.is_empty() {
        print_summary(reporter.summary());
        bail!("none of the requested groups can be migrated");
    }
    info!(groups = confirmations.len(), "starting migration");

    let migration = orchestrator.migrate_all(confirmations, &snapshot);
    tokio::pin!(migration);
    let results = tokio::select! {
        results = &mut migration => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling jobs that have not reached cutover");
            for job in orchestrator.active_jobs() {
                if let Err(err) = orchestrator.cancel(&job.group) {
                    warn!(group = %job.group, %err, "job continues");
                }
            }
            migration.await
        }
    };

    let mut fatal = false;
    for (group, result) in &results {
        if let Err(err) = result {
            error!(%group, %err, "migration failed");
            fatal |= err.is_fatal();
        }
        if let Some(job) = orchestrator.job(group) {
            reporter.record_job(&job);
        }
    }
    let summary = reporter.into_summary();
    print_json(&summary)?;

    Ok(if fatal {
        EXIT_FATAL
    } else if results.iter().any(|(_, result)| result.is_err()) {
        EXIT_JOB_FAILED
    } else {
        EXIT_OK
    })
}

async fn reconcile(ctx: &Context) -> anyhow::Result<i32> {
    let orchestrator = ctx.orchestrator()?;
    let results = orchestrator.reconcile().await;
    if results.is_empty() {
        println!("no unfinished jobs");
        return Ok(EXIT_OK);
    }
    let mut reporter = ResultReporter::new();
    for (group, result) in &results {
        if let Err(err) = result {
            error!(%group, %err, "reconciliation left job failed");
        }
        if let Some(job) = orchestrator.job(group) {
            reporter.record_job(&job);
        }
    }
    print_summary(reporter.summary());
    Ok(if results.iter().any(|(_, result)| result.is_err()) {
        EXIT_JOB_FAILED
    } else {
        EXIT_OK
    })
}

fn status(ctx: &Context, args: &ArgMatches) -> anyhow::Result<i32> {
    let orchestrator = ctx.orchestrator()?;
    match args.get_one::<String>("group") {
        Some(group) => {
            let group = GroupId::new(group.as_str());
            let job = orchestrator
                .job(&group)
                .ok_or(MigrationError::UnknownJob { group })?;
            print_json(&job)?;
        }
        None => print_json(&orchestrator.ledger())?,
    }
    Ok(EXIT_OK)
}

async fn abort(ctx: &Context, args: &ArgMatches) -> anyhow::Result<i32> {
    let Some(group) = args.get_one::<String>("group") else {
        bail!("--group is required");
    };
    let group = GroupId::new(group.as_str());
    ctx.orchestrator()?.abort_conversion(&group).await?;
    println!("conversion aborted for {group}");
    Ok(EXIT_OK)
}

async fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    let Some(config) = matches.get_one::<PathBuf>("config") else {
        bail!("--config is required");
    };
    let ctx = Context::load(config)?;

    match matches.subcommand() {
        Some(("inventory", args)) => inventory(&ctx, args).await,
        Some(("validate", args)) => validate(&ctx, args).await,
        Some(("migrate", args)) => migrate(&ctx, args).await,
        Some(("reconcile", _)) => reconcile(&ctx).await,
        Some(("status", args)) => status(&ctx, args),
        Some(("abort", args)) => abort(&ctx, args).await,
        _ => bail!("unknown command"),
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let code = match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn confirm_is_repeatable() {
        let matches = cli()
            .try_get_matches_from(["wlm", "migrate", "--confirm", "lobby", "--confirm", "floor-2"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let groups: Vec<_> = args.get_many::<String>("confirm").unwrap().collect();
        assert_eq!(groups, ["lobby", "floor-2"]);
    }

    #[test]
    fn config_defaults_and_is_global() {
        let matches = cli()
            .try_get_matches_from(["wlm", "status", "--config", "site.toml"])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("site.toml"))
        );

        let matches = cli().try_get_matches_from(["wlm", "reconcile"]).unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("wlm.toml"))
        );
    }

    #[test]
    fn migrate_requires_a_group() {
        assert!(cli().try_get_matches_from(["wlm", "migrate"]).is_err());
    }
}
