use std::{env, error::Error, path::PathBuf, process};

use anyhow::Result;
use carscope::ImportOpts;
use log::error;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
struct ImportArgs {
    /// Path to a repository archive (CAR file)
    #[structopt(parse(from_os_str))]
    archive: PathBuf,
    /// Re-hash every block and check it against its CID
    #[structopt(long)]
    verify: bool,
    /// Count only record payload bytes, not block framing
    #[structopt(long)]
    payload_sizes: bool,
}

impl ImportArgs {
    fn opts(&self) -> ImportOpts {
        ImportOpts {
            verify: self.verify,
            payload_sizes: self.payload_sizes,
        }
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "carscope")]
/// Browse a repository archive as folders and files.
enum Commands {
    /// Record count, total size and owner of the repository
    Summary {
        #[structopt(flatten)]
        import: ImportArgs,
    },
    /// Folder tree with aggregate sizes
    Tree {
        #[structopt(flatten)]
        import: ImportArgs,
        /// Levels to show (if 0, show all levels; defaults to tree_depth from config)
        #[structopt(long, short)]
        depth: Option<usize>,
    },
    /// List the contents of a folder, given as one label per argument
    Ls {
        #[structopt(flatten)]
        import: ImportArgs,
        /// Labels from the top level down, e.g. app.bsky feed post
        path: Vec<String>,
    },
}

pub async fn try_main() -> Result<()> {
    match Commands::from_args() {
        Commands::Summary { import } => {
            carscope::summary(&import.archive, import.opts()).await?;
        }
        Commands::Tree { import, depth } => {
            carscope::tree(&import.archive, depth, import.opts()).await?;
        }
        Commands::Ls { import, path } => {
            carscope::list(&import.archive, &path, import.opts()).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }

    pretty_env_logger::init();

    if let Err(err) = try_main().await {
        error!("{}", err);
        err.chain()
            .skip(1)
            .for_each(|cause| eprintln!("because: {}", cause));
        process::exit(1);
    }

    Ok(())
}
