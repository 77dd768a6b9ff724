use clap::{
    Args,
    Parser,
    Subcommand,
};
use permissions_core::{
    Network,
    cache::DEFAULT_BLOCKS_PER_REQUEST,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "permissions-transition",
    version,
    about = "Replays on-chain permission events and plans the transition to the target configuration"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    #[command(flatten)]
    pub args: GlobalArgs,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Network whose configuration and events cache are used.
    #[arg(long, global = true, env = "NETWORK", default_value = "mainnet")]
    pub network: Network,

    /// Target configuration file. Defaults to `config/<network>.json`.
    #[arg(long, global = true, env = "PERMISSIONS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding one events cache per network.
    #[arg(long, global = true, env = "EVENTS_DIR", default_value = "events")]
    pub events_dir: PathBuf,

    #[arg(short, long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    pub fn json_output(&self) -> bool {
        self.json
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.network.default_config_path())
    }

    pub fn events_path(&self) -> PathBuf {
        self.events_dir.join(format!("{}.json", self.network))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch permission events up to the node head into the events cache.
    Collect(CollectArgs),
    /// Replay the events cache and print the resulting snapshot.
    Snapshot(SnapshotArgs),
    /// Reconcile the snapshot with the target configuration and write the
    /// transition plan.
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    #[arg(long, env = "BLOCKS_PER_REQUEST", default_value_t = DEFAULT_BLOCKS_PER_REQUEST)]
    pub blocks_per_request: u64,

    /// Retries per `eth_getLogs` query before giving up.
    #[arg(long, default_value_t = 4)]
    pub max_retries: u32,
}

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Write the snapshot here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: String,

    #[arg(long, default_value = "transition-plans")]
    pub out_dir: PathBuf,

    /// Fail on current holders missing from the label table instead of
    /// showing them as unknown.
    #[arg(long)]
    pub strict_labels: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_collect_with_defaults() {
        let cli = Cli::try_parse_from([
            "permissions-transition",
            "collect",
            "--rpc-url",
            "http://localhost:8545",
        ])
        .unwrap();
        assert_eq!(cli.args.network, Network::Mainnet);
        assert_eq!(cli.args.config_path(), Path::new("config/mainnet.json"));
        assert_eq!(cli.args.events_path(), Path::new("events/mainnet.json"));
        match cli.command {
            Commands::Collect(args) => {
                assert_eq!(args.blocks_per_request, DEFAULT_BLOCKS_PER_REQUEST);
                assert_eq!(args.max_retries, 4);
            }
            _ => panic!("expected collect command"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "permissions-transition",
            "plan",
            "--rpc-url",
            "http://localhost:8545",
            "--network",
            "hoodi",
            "--json",
            "--strict-labels",
        ])
        .unwrap();
        assert!(cli.args.json_output());
        assert_eq!(cli.args.events_path(), Path::new("events/hoodi.json"));
        match cli.command {
            Commands::Plan(args) => {
                assert!(args.strict_labels);
                assert_eq!(args.out_dir, Path::new("transition-plans"));
            }
            _ => panic!("expected plan command"),
        }
    }

    #[test]
    fn rejects_unknown_network() {
        assert!(Cli::try_parse_from(["permissions-transition", "--network", "sepolia", "snapshot"]).is_err());
    }
}
