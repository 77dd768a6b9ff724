use crate::cli::{
    CollectArgs,
    GlobalArgs,
    PlanArgs,
    SnapshotArgs,
};
use color_eyre::{
    Result,
    eyre::{
        WrapErr,
        bail,
    },
};
use permissions_core::{
    EventsCache,
    ReconcileOptions,
    Snapshot,
    TargetConfig,
    TransitionPlan,
    reconcile,
    render_markdown,
    replay,
};
use permissions_rpc::{
    AlloyLogSource,
    FetcherConfig,
    LogFetcher,
    RpcChainReader,
    connect_provider,
};
use serde_json::json;
use std::{
    fs,
    path::Path,
};
use tracing::{
    info,
    warn,
};

fn load_config(args: &GlobalArgs) -> Result<TargetConfig> {
    let path = args.config_path();
    let config = TargetConfig::load(&path)
        .wrap_err_with(|| format!("failed to load target config for {}", args.network))?;
    info!(
        network = %args.network,
        path = %path.display(),
        labels = config.labels.len(),
        "loaded target config"
    );
    Ok(config)
}

fn load_events(args: &GlobalArgs) -> Result<EventsCache> {
    let path = args.events_path();
    if !path.exists() {
        bail!(
            "no events cache at {}, run `collect` for {} first",
            path.display(),
            args.network
        );
    }
    Ok(EventsCache::load(&path)?)
}

fn replay_cache(cache: &EventsCache) -> Result<Snapshot> {
    let snapshot = replay(cache.to_block, &cache.events).wrap_err("events cache cannot be replayed")?;
    info!(
        snapshot_block = snapshot.snapshot_block,
        events = cache.events.len(),
        "replayed events cache"
    );
    Ok(snapshot)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).wrap_err_with(|| format!("failed to write {}", path.display()))
}

impl CollectArgs {
    pub async fn run(&self, args: &GlobalArgs) -> Result<()> {
        let config = load_config(args)?;
        let provider = connect_provider(&self.rpc_url)
            .await
            .wrap_err("failed to connect to RPC")?;
        let fetcher = LogFetcher::new(
            AlloyLogSource::new(provider),
            FetcherConfig {
                blocks_per_request: self.blocks_per_request,
                max_attempts: self.max_retries.saturating_add(1),
                ..Default::default()
            },
            config.acl.address,
            &config.role_contracts(),
        );

        let path = args.events_path();
        let mut cache = EventsCache::load_or_genesis(&path, config.genesis_block)?;
        let collected = fetcher.collect_to_head(&mut cache, &path).await?;

        if args.json_output() {
            println!(
                "{}",
                json!({
                    "status": "success",
                    "network": args.network.as_str(),
                    "toBlock": cache.to_block,
                    "newEvents": collected,
                    "totalEvents": cache.events.len(),
                })
            );
        } else {
            println!(
                "Collected {collected} new events for {} up to block {} ({} total)",
                args.network,
                cache.to_block,
                cache.events.len()
            );
        }
        Ok(())
    }
}

impl SnapshotArgs {
    pub fn run(&self, args: &GlobalArgs) -> Result<()> {
        let cache = load_events(args)?;
        let snapshot = replay_cache(&cache)?;
        let rendered = serde_json::to_string_pretty(&snapshot)?;
        match &self.out {
            Some(path) => {
                write_file(path, &rendered)?;
                info!(path = %path.display(), "wrote snapshot");
            }
            None => println!("{rendered}"),
        }
        Ok(())
    }
}

impl PlanArgs {
    pub async fn run(&self, args: &GlobalArgs) -> Result<()> {
        let config = load_config(args)?;
        let cache = load_events(args)?;
        let snapshot = replay_cache(&cache)?;

        let provider = connect_provider(&self.rpc_url)
            .await
            .wrap_err("failed to connect to RPC")?;
        let reader = RpcChainReader::new(provider);
        let options = ReconcileOptions {
            allow_unknown_holders: !self.strict_labels,
        };
        let reconciliation = reconcile(&config, &snapshot, &reader, options)
            .await
            .wrap_err("failed to reconcile permissions")?;
        let plan = TransitionPlan::new(reconciliation);

        let path = self
            .out_dir
            .join(format!("{}-{}.md", args.network, snapshot.snapshot_block));
        write_file(&path, &render_markdown(&plan, &config))?;
        info!(path = %path.display(), steps = plan.step_count(), "wrote transition plan");

        if args.json_output() {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            println!(
                "Transition plan with {} step(s) written to {}",
                plan.step_count(),
                path.display()
            );
        }

        let issues: Vec<String> = plan.issues().map(ToString::to_string).collect();
        if !issues.is_empty() {
            for issue in &issues {
                warn!("{issue}");
            }
            bail!("transition plan has {} unresolved issue(s)", issues.len());
        }
        Ok(())
    }
}
