use std::path::PathBuf;

use clap::Parser;

use super::ContextUri;

const CONTEXT_URI_DEFAULT: &str = "classpath:engine-context.yaml";
const ROUTES_PATH_DEFAULT: &str = "../routes";

/// Command-line options
#[derive(Parser, Debug, Clone)]
#[command(name = "routerunner")]
#[command(about = "Loads pipeline scripts into a routing engine and keeps them running")]
#[command(long_about = None)]
pub struct Opt {
    /// Context descriptor URI (file: or classpath:)
    #[arg(
        short = 'c',
        long = "camelContextUri",
        visible_alias = "context-uri",
        default_value = CONTEXT_URI_DEFAULT
    )]
    pub context_uri: ContextUri,

    /// Routes folder path
    #[arg(
        short = 'r',
        long = "routesPath",
        visible_alias = "routes-path",
        default_value = ROUTES_PATH_DEFAULT
    )]
    pub routes_path: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,
}
