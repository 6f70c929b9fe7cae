use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kembed::{Config, Process, Session};

#[derive(Parser)]
#[command(about = "Train and query multi-task word, subword and phrase embeddings", long_about = None)]
struct Options {
    /// Configuration file of `key = value` lines
    #[arg(value_name = "CONF")]
    conf: PathBuf,

    /// One of train, distance, predict, sentence_vec; overrides `process`
    #[arg(long)]
    process: Option<Process>,

    /// Load the model from DIR; overrides `modeldir`
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Train on FILE; overrides `trainfile`
    #[arg(long, value_name = "FILE")]
    train_file: Option<PathBuf>,

    /// Report accuracy on FILE during training; overrides `evalfile`
    #[arg(long, value_name = "FILE")]
    eval_file: Option<PathBuf>,

    /// Save the trained model to DIR; overrides `outputdir`
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Use N threads; overrides `thread`
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
}

impl Options {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(&self.conf)?;
        if let Some(process) = self.process {
            config.process = process;
        }
        let paths = [
            ("modeldir", &self.model_dir),
            ("trainfile", &self.train_file),
            ("evalfile", &self.eval_file),
            ("outputdir", &self.output_dir),
        ];
        for (key, path) in paths {
            if let Some(path) = path {
                config.set(key, &path.to_string_lossy())?;
            }
        }
        if let Some(threads) = self.threads {
            config.set("thread", &threads.to_string())?;
        }
        config.check()?;
        Ok(config)
    }
}

fn run(options: Options) -> Result<()> {
    let config = options.config()?;
    info!(process = %config.process, "starting");
    match config.process {
        Process::Train => {
            let session = Session::build(config)?;
            session.train()?;
            let dir = session.save()?;
            info!(dir = %dir.display(), "model saved");
        }
        Process::Distance => {
            let session = Session::load(config)?;
            session.distance(io::stdin().lock(), io::stdout().lock())?;
        }
        Process::Predict => {
            let session = Session::load(config)?;
            session.predict(io::stdin().lock(), io::stdout().lock())?;
        }
        Process::SentenceVec => {
            let session = Session::load(config)?;
            session.sentence_vec(io::stdin().lock(), io::stdout().lock())?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let options = Options::parse();
    if let Err(err) = run(options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
