use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "V-model requirements and trace management")]
pub struct Cli {
    /// Project name from the registry, or a project directory
    #[clap(long, short = 'p')]
    pub project: Option<String>,

    /// Reject malformed records instead of repairing them
    #[clap(long)]
    pub strict: bool,

    /// Author recorded on issued revisions
    #[clap(long)]
    pub author: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new project in a directory
    Init {
        /// Project directory (defaults to the current directory)
        path: Option<PathBuf>,

        /// Repository remote URL
        #[clap(long)]
        remote: Option<String>,

        /// Register the project under this name
        #[clap(long)]
        name: Option<String>,
    },

    /// Manage documents
    #[clap(subcommand)]
    Doc(DocCommand),

    /// Manage content nodes
    #[clap(subcommand)]
    Node(NodeCommand),

    /// Manage trace links
    #[clap(subcommand)]
    Trace(TraceCommand),

    /// Report missing and suspect traces
    Audit {
        /// Only audit this document
        #[clap(long)]
        doc: Option<u64>,

        /// Only show nodes with findings
        #[clap(long)]
        problems: bool,
    },

    /// Export a document
    Export {
        /// Document ID
        doc: u64,

        /// Output format (markdown, report, json)
        #[clap(long, default_value = "markdown")]
        format: String,

        /// Output file path (prints to stdout if omitted, except json)
        #[clap(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Remove node records that no document reaches
    Gc {
        /// Only list the orphans
        #[clap(long)]
        dry_run: bool,
    },

    /// Upgrade a legacy project in place
    Migrate,

    /// Manage the contributor roster
    #[clap(subcommand)]
    Contributor(ContributorCommand),

    /// Manage the project registry
    #[clap(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum DocCommand {
    /// Create a document
    Add {
        /// Document type (URS, SRS, ADS, DDS, ATP, STP, ITP, UTP)
        #[clap(long, short = 't')]
        r#type: Option<String>,

        /// Document name
        #[clap(long)]
        name: Option<String>,
    },

    /// List documents
    List,

    /// Show a document as an indented tree
    Show {
        /// Document ID
        id: u64,
    },

    /// Issue a new revision
    Issue {
        /// Document ID
        id: u64,

        /// Bump the major version instead of the minor
        #[clap(long)]
        major: bool,

        /// Issue the trace report instead of the document body
        #[clap(long)]
        report: bool,

        /// Revision details (repeatable)
        #[clap(long, short = 'm')]
        details: Vec<String>,
    },

    /// Delete a document and all of its nodes
    Del {
        /// Document ID
        id: u64,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// Add a node under a document or another node
    Add {
        /// Parent document ID
        #[clap(long, conflicts_with = "parent")]
        doc: Option<u64>,

        /// Parent node ID
        #[clap(long)]
        parent: Option<u64>,

        /// Category code (heading, comment, image, diagram, UFR, SNFR, ADC, UT, ...)
        #[clap(long, short = 'c')]
        category: Option<String>,

        /// Node text
        #[clap(long)]
        text: Option<String>,
    },

    /// Set one field of a node
    Edit {
        /// Node ID
        id: u64,

        /// Field (text, rationale, expected_results, image_path, caption, category)
        #[clap(long, default_value = "text")]
        field: String,

        /// New value (prompts with an editor if omitted)
        #[clap(long)]
        value: Option<String>,
    },

    /// Show a node with its classified traces
    Show {
        /// Node ID
        id: u64,
    },

    /// Delete a node and its descendants
    Del {
        /// Node ID
        id: u64,

        /// Skip confirmation prompt
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Move a node up one level
    Promote { id: u64 },

    /// Move a node under its preceding heading
    Demote { id: u64 },

    /// Swap a node with its previous sibling
    Up { id: u64 },

    /// Swap a node with its next sibling
    Down { id: u64 },

    /// Re-parent a node
    Move {
        /// Node ID
        id: u64,

        /// New parent document ID
        #[clap(long, conflicts_with = "parent")]
        doc: Option<u64>,

        /// New parent node ID
        #[clap(long)]
        parent: Option<u64>,

        /// Position among the new siblings (appends if omitted)
        #[clap(long)]
        index: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TraceCommand {
    /// Link two nodes
    Add { a: u64, b: u64 },

    /// Unlink two nodes
    Rm { a: u64, b: u64 },

    /// Clear the suspect flag on a link
    Verify {
        a: u64,
        b: u64,

        /// Clear the flag on both ends
        #[clap(long)]
        both: bool,
    },

    /// Show a node's partners grouped by relation
    Classify { id: u64 },
}

#[derive(Subcommand, Debug)]
pub enum ContributorCommand {
    /// Add a contributor
    Add {
        name: String,

        #[clap(long, default_value = "")]
        email: String,
    },

    /// Remove a contributor
    Rm { name: String },

    /// List contributors
    List,
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Register a project in the registry
    Register {
        /// Name of the project
        #[clap(long)]
        name: Option<String>,

        /// Project directory
        #[clap(long)]
        path: Option<PathBuf>,

        /// Description of the project
        #[clap(long)]
        description: Option<String>,

        /// Set this project as the default
        #[clap(long)]
        default: bool,

        /// Use interactive mode (prompts)
        #[clap(long)]
        interactive: bool,
    },

    /// List registered projects
    List,

    /// Print the root directory of a project
    Path {
        /// The name of the project to look up
        #[clap(long)]
        name: Option<String>,
    },
}
