//! `AudioProcessor` backed by the ffmpeg and ffprobe binaries.
//!
//! Every call writes its inputs to scratch files, runs one subprocess and
//! reads the output back. Subprocesses are killed if the calling future is
//! dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::filters::{limit_filters, FilterKind, FilterPlan};
use super::{AudioError, AudioProcessor};
use crate::config::FfmpegConfig;

const SCRATCH_PREFIX: &str = "avatarcast_";

/// Output encoding shared by every command that produces audio.
const MP3_OUT: [&str; 8] = ["-c:a", "mp3", "-b:a", "192k", "-ar", "44100", "-ac", "2"];

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: String,
}

fn parse_probe(stdout: &[u8]) -> Result<Duration, AudioError> {
    let out: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| AudioError::Probe(format!("unreadable ffprobe output: {e}")))?;
    let secs: f64 = out
        .format
        .duration
        .trim()
        .parse()
        .map_err(|_| AudioError::Probe(format!("bad duration {:?}", out.format.duration)))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| AudioError::Probe(format!("bad duration {secs}: {e}")))
}

/// `filter_complex` joining `n` inputs, optionally with silence in between.
fn concat_graph(n: usize, padding: Duration) -> String {
    let mut graph = String::new();

    if padding.is_zero() {
        for i in 0..n {
            graph.push_str(&format!("[{i}:a]"));
        }
        graph.push_str(&format!("concat=n={n}:v=0:a=1[out]"));
        return graph;
    }

    let pad = padding.as_secs_f64();
    for i in 1..n {
        graph.push_str(&format!(
            "anullsrc=channel_layout=stereo:sample_rate=44100,atrim=duration={pad:.3}[silence{i}];"
        ));
    }
    graph.push_str("[0:a]");
    for i in 1..n {
        graph.push_str(&format!("[silence{i}][{i}:a]"));
    }
    graph.push_str(&format!("concat=n={}:v=0:a=1[out]", 2 * n - 1));
    graph
}

#[derive(Debug, Clone)]
pub struct FfmpegClient {
    config: FfmpegConfig,
}

impl FfmpegClient {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    fn tmp_dir(&self) -> PathBuf {
        self.config
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    fn scratch(&self, suffix: &str) -> Result<NamedTempFile, AudioError> {
        Ok(tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(suffix)
            .tempfile_in(self.tmp_dir())?)
    }

    async fn write_scratch(&self, data: &[u8]) -> Result<NamedTempFile, AudioError> {
        let file = self.scratch("")?;
        tokio::fs::write(file.path(), data).await?;
        Ok(file)
    }

    async fn run(&self, tool: &'static str, bin: &str, args: &[String]) -> Result<Vec<u8>, AudioError> {
        tracing::debug!(tool, ?args, "running");
        let output = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(AudioError::Tool {
                tool,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Run ffmpeg writing to a fresh `.mp3` scratch file, return its bytes.
    async fn ffmpeg_to_mp3(&self, mut args: Vec<String>) -> Result<Vec<u8>, AudioError> {
        let out = self.scratch(".mp3")?;
        args.push("-y".into());
        args.push(path_arg(out.path()));
        self.run("ffmpeg", &self.config.ffmpeg_bin, &args).await?;
        Ok(tokio::fs::read(out.path()).await?)
    }

    async fn probe_path(&self, path: &Path) -> Result<Duration, AudioError> {
        let args = strings(&["-v", "quiet", "-print_format", "json", "-show_format"])
            .into_iter()
            .chain([path_arg(path)])
            .collect::<Vec<_>>();
        let stdout = self.run("ffprobe", &self.config.ffprobe_bin, &args).await?;
        parse_probe(&stdout)
    }

    async fn apply_one(&self, audio: &[u8], kind: FilterKind) -> Result<Vec<u8>, AudioError> {
        let input = self.write_scratch(audio).await?;

        let duration = if kind.needs_duration() {
            self.probe_path(input.path()).await?
        } else {
            Duration::ZERO
        };

        let mut args = vec!["-i".to_string(), path_arg(input.path())];
        match kind.plan(duration) {
            FilterPlan::Chain(chain) => {
                args.extend(strings(&["-nostats", "-loglevel", "0", "-af"]));
                args.push(chain);
            }
            FilterPlan::Reverb { file, ghost } => {
                args.push("-i".into());
                args.push(path_arg(&self.config.background_dir.join(file)));
                let graph = if ghost {
                    "[0] adelay=1000|1000 [input]; [input] areverse [reverse]; \
                     [reverse] [1] afir=dry=10:wet=10 [afirich]; [afirich] areverse [afirichreverse]; \
                     [0] adelay=1000|1000 [dry]; [dry] [afirichreverse] amix=inputs=2:weights=5 10 [out]"
                } else {
                    "[0] [1] afir=dry=10:wet=10 [reverb]; [0] [reverb] amix=inputs=2:weights=10 1 [out]"
                };
                args.extend(strings(&["-filter_complex", graph, "-map", "[out]"]));
            }
            FilterPlan::Background { file } => {
                args.extend(strings(&["-stream_loop", "-1", "-i"]));
                args.push(path_arg(&self.config.background_dir.join(file)));
                args.extend(strings(&[
                    "-filter_complex",
                    "[0:a][1:a]amix=inputs=2:duration=first:dropout_transition=0[out]",
                    "-map",
                    "[out]",
                ]));
            }
        }
        args.extend(strings(&MP3_OUT));

        self.ffmpeg_to_mp3(args).await
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl AudioProcessor for FfmpegClient {
    async fn probe_duration(&self, audio: &[u8]) -> Result<Duration, AudioError> {
        let input = self.write_scratch(audio).await?;
        self.probe_path(input.path()).await
    }

    async fn to_mp3(&self, audio: &[u8]) -> Result<Vec<u8>, AudioError> {
        let input = self.write_scratch(audio).await?;
        let mut args = vec!["-i".to_string(), path_arg(input.path())];
        args.extend(strings(&[
            "-nostats", "-loglevel", "0", "-ar", "44100", "-ac", "2", "-b:a", "192k", "-vn", "-f",
            "mp3",
        ]));
        self.ffmpeg_to_mp3(args).await
    }

    async fn cut(&self, audio: &[u8], duration: Duration) -> Result<Vec<u8>, AudioError> {
        let input = self.write_scratch(audio).await?;
        let mut args = vec!["-i".to_string(), path_arg(input.path())];
        args.extend(strings(&["-nostats", "-loglevel", "0", "-t"]));
        args.push(format!("{:.3}", duration.as_secs_f64()));
        args.extend(strings(&MP3_OUT));
        self.ffmpeg_to_mp3(args).await
    }

    async fn apply_filters(&self, audio: &[u8], filters: &[String]) -> Result<Vec<u8>, AudioError> {
        let kinds = limit_filters(filters)
            .iter()
            .map(|name| {
                FilterKind::from_name(name).ok_or_else(|| AudioError::InvalidFilter(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut audio = audio.to_vec();
        for kind in kinds {
            audio = self.apply_one(&audio, kind).await?;
        }
        Ok(audio)
    }

    async fn concatenate(
        &self,
        padding: Duration,
        mut clips: Vec<Vec<u8>>,
    ) -> Result<Vec<u8>, AudioError> {
        match clips.len() {
            0 => return Err(AudioError::NoInput),
            1 => return Ok(clips.remove(0)),
            _ => {}
        }

        let mut inputs = Vec::with_capacity(clips.len());
        for clip in &clips {
            inputs.push(self.write_scratch(clip).await?);
        }

        let mut args = Vec::new();
        for input in &inputs {
            args.push("-i".to_string());
            args.push(path_arg(input.path()));
        }
        args.push("-filter_complex".into());
        args.push(concat_graph(inputs.len(), padding));
        args.extend(strings(&["-map", "[out]"]));
        args.extend(strings(&MP3_OUT));

        self.ffmpeg_to_mp3(args).await
    }
}
