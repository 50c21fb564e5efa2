use clap::{Parser, Subcommand, ValueEnum};

pub mod commands;
pub mod output;

#[derive(Parser)]
#[command(
    name = "jvmap",
    version,
    about = "Cross-reference index and safe renaming for JVM class files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace directory holding .jvmap/index.db (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    pub workspace: String,

    /// Path to config file (default: .jvmap/config.toml or jvmap.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import class files, archives, or directories into the workspace
    Import {
        /// Files or directories to import
        #[arg(required = true)]
        paths: Vec<String>,
        /// Import only; skip mapping the imported files
        #[arg(long)]
        no_map: bool,
    },

    /// Map every file in the workspace (rebuilds the symbol table)
    Map,

    /// List symbols in the workspace
    Symbols {
        /// Filter by symbol kind (class, field, method)
        #[arg(long)]
        kind: Option<String>,
        /// Filter by declaring file path
        #[arg(long)]
        file: Option<String>,
        /// Only symbols declared in the workspace (no placeholders)
        #[arg(long)]
        declared: bool,
    },

    /// Find all references to a symbol identity
    References {
        /// Identity, e.g. com/x/Foo, com/x/Foo::bar:I, com/x/Foo::baz()V
        identity: String,
    },

    /// Rename a class, field, or method and rewrite every use
    Rename {
        /// Identity of the symbol to rename
        identity: String,
        /// New name: a simple name, or for classes a name in the same package
        new_name: String,
    },

    /// Write the workspace's (possibly rewritten) files to a directory
    Export {
        /// Destination directory
        dest: String,
    },

    /// Workspace overview statistics
    Summary,
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Compact,
}
