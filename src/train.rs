use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::atomic::Ordering;
use std::thread;

use anyhow::{anyhow, ensure, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::corpus::Example;
use crate::real;
use crate::session::Session;
use crate::text::trim;
use crate::trainer::{TaskKind, Worker};

/// Reads the next line into `buf`, starting over at the top of the file at
/// EOF.
fn read_line_wrapping(fin: &mut BufReader<File>, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    if fin.read_until(b'\n', buf)? == 0 {
        fin.seek(SeekFrom::Start(0))?;
        fin.read_until(b'\n', buf)?;
    }
    Ok(())
}

impl Session {
    /// Runs `epoch` passes over the training file on `thread` threads, all
    /// updating the same weights without locks.
    pub fn train(&self) -> Result<()> {
        let config = self.config();
        let Some(path) = &config.train_file else {
            return Err(anyhow!("trainfile is required for training"));
        };
        ensure!(self.total_lines > 0, "training file {} is empty", path.display());
        let file_size = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        let target = self.total_lines * config.epochs as u64;
        info!(
            file = %path.display(),
            threads = config.threads,
            lines = target,
            "starting training"
        );

        let bar = ProgressBar::new(target);
        bar.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>9}/{len:9} {msg}",
            )
            .context("invalid progress template")?,
        );

        let mut result = Ok(());
        thread::scope(|s| {
            let this: &Session = self;
            let bar = &bar;
            let threads = (0..config.threads)
                .map(|id| s.spawn(move || this.train_thread(id, file_size, target, bar)))
                .collect::<Vec<_>>();
            for thread in threads {
                let outcome = thread
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("training thread panicked")));
                if let Err(err) = outcome {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        });
        bar.finish();
        result
    }

    fn train_thread(&self, id: usize, file_size: u64, target: u64, bar: &ProgressBar) -> Result<()> {
        let config = self.config();
        let Some(path) = &config.train_file else {
            return Err(anyhow!("trainfile is required for training"));
        };
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut fin = BufReader::new(file);
        fin.seek(SeekFrom::Start(file_size * id as u64 / config.threads as u64))
            .context("error seeking within training file")?;

        let mut buf = Vec::new();
        // The seek usually lands mid-line.
        read_line_wrapping(&mut fin, &mut buf).context("error reading training file")?;

        let mut worker = Worker::new(config.dim, id as u64 + 1);
        let mut line_counter: usize = 0;
        loop {
            let done = self.progress.fetch_add(1, Ordering::Relaxed);
            if done >= target {
                break;
            }
            line_counter += 1;
            let progress = (done + 1) as real / target as real;
            if line_counter % config.get_loss_every == 0 {
                self.net
                    .learning_rate
                    .set(config.learn_rate * (1.0 - progress));
            }

            read_line_wrapping(&mut fin, &mut buf).context("error reading training file")?;
            let line = String::from_utf8_lossy(&buf);
            let line = trim(&line).to_ascii_lowercase();
            if let Some(example) = Example::parse(&line, config) {
                self.dispatch(&example, &mut worker);
            }

            if id == 0 {
                if line_counter >= config.eval_every {
                    line_counter = 0;
                    self.report(progress, true, bar);
                } else if line_counter % config.get_loss_every == 0 {
                    self.report(progress, false, bar);
                }
            }
        }
        if id == 0 {
            self.report(1.0, true, bar);
        }
        Ok(())
    }

    /// Hands one example to its task, and to skip-gram as well when the task
    /// asks for that.
    pub(crate) fn dispatch(&self, example: &Example, worker: &mut Worker) {
        let net = &self.net;
        match *example {
            Example::Skip { text } => {
                if let Some(skip) = &self.skip {
                    skip.update_skip(net, worker, text);
                }
            }
            Example::Cls { tag, label, text } => {
                let Some(trainer) = self.cls.get(tag) else {
                    return;
                };
                trainer.update_cls(net, worker, text, label);
                if let Some(skip) = self.skip.as_ref().filter(|_| trainer.params().use_as_skip_example) {
                    skip.update_skip(net, worker, text);
                }
            }
            Example::Pair { tag, label, a, b } => {
                let Some(trainer) = self.pair.get(tag) else {
                    return;
                };
                trainer.update_pair(net, worker, a, b, label);
                if let Some(skip) = self.skip.as_ref().filter(|_| trainer.params().use_as_skip_example) {
                    skip.update_skip(net, worker, a);
                    skip.update_skip(net, worker, b);
                }
            }
        }
    }

    /// Logs the learning rate and every task's loss, plus evaluation accuracy
    /// when `with_eval`.
    fn report(&self, progress: real, with_eval: bool, bar: &ProgressBar) {
        let mut losses = String::new();
        for trainer in self.trainers() {
            let name = match trainer.kind() {
                TaskKind::Skip => "skip".to_string(),
                kind => format!("{kind}-{}", trainer.tag()),
            };
            losses += &format!(" {name}-loss: {:.4}", trainer.loss());
        }
        let learning_rate = self.net.learning_rate.get();
        let target = self.total_lines * self.config().epochs as u64;
        bar.set_position(self.progress.load(Ordering::Relaxed).min(target));
        bar.set_message(format!("lr: {learning_rate:.6}{losses}"));

        if with_eval {
            let mut accuracies = String::new();
            for (tag, acc) in self.eval_cls() {
                accuracies += &format!(" cls-{tag}-acc: {acc:.4}");
            }
            for (tag, acc) in self.eval_pair() {
                accuracies += &format!(" pair-{tag}-acc: {acc:.4}");
            }
            info!(progress, learning_rate, "{}{}", losses.trim(), accuracies);
        } else {
            debug!(progress, learning_rate, "{}", losses.trim());
        }
    }
}
