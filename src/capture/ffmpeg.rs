//! FFmpeg-backed microphone capture
//!
//! Each stretch between start/resume and pause/stop is encoded by its own
//! FFmpeg process into a segment file. Stopping joins the segments into a
//! single `.m4a` in the output directory.

use super::traits::{
    CapabilityFactory, CaptureError, CaptureOptions, CaptureResult, RecordingCapability,
    RecordingStatus,
};
use crate::config::RecorderConfig;
use crate::recorder::state::RecordingSession;
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Encoder settings for microphone capture
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    /// FFmpeg executable
    pub ffmpeg_path: PathBuf,

    /// Input demuxer (`avfoundation`, `dshow`, `pulse`, ...)
    pub input_format: String,

    /// Input device name understood by the demuxer
    pub input_device: String,

    /// AAC bitrate in kbps
    pub bitrate_kbps: u32,

    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Where finished recordings are written
    pub output_dir: PathBuf,

    /// How long to wait for FFmpeg to finalize a segment or join segments
    pub stop_timeout: Duration,

    /// How long to watch a fresh encoder for an immediate failure
    pub startup_grace: Duration,
}

impl From<&RecorderConfig> for FfmpegSettings {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            input_format: config.input_format.clone(),
            input_device: config.input_device.clone(),
            bitrate_kbps: config.bitrate_kbps,
            sample_rate: config.sample_rate,
            output_dir: config.cache_dir.clone(),
            stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            startup_grace: Duration::from_millis(config.startup_grace_ms),
        }
    }
}

impl FfmpegSettings {
    /// Arguments for capturing one segment to `output`
    pub fn capture_args(&self, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            self.input_format.clone(),
            "-i".to_string(),
            self.input_device.clone(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", self.bitrate_kbps),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Arguments for joining the segments listed in `list` into `output`
    pub fn concat_args(&self, list: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

/// Contents of an FFmpeg concat demuxer list
fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Wait for `child` to exit, killing it once `timeout` has passed
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> CaptureResult<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureError::Encoder(format!(
                "FFmpeg did not finish within {:?}",
                timeout
            )));
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Ask FFmpeg to finalize its output and wait for it to exit
fn finish_encoder(mut child: Child, timeout: Duration) -> CaptureResult<()> {
    // FFmpeg writes the container trailer when it reads 'q' on stdin
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(b"q\n") {
            tracing::debug!("FFmpeg stdin already closed: {}", e);
        }
    }

    let status = wait_with_deadline(&mut child, timeout)?;
    if !status.success() {
        return Err(CaptureError::Encoder(format!("FFmpeg exited with {}", status)));
    }
    Ok(())
}

/// Files and processes of the capture in progress
struct ActiveCapture {
    work_dir: PathBuf,
    segments: Vec<PathBuf>,
    sessions: Vec<RecordingSession>,
    encoder: Option<Child>,
}

impl ActiveCapture {
    fn new(work_dir: PathBuf) -> Self {
        Self {
            work_dir,
            segments: Vec::new(),
            sessions: Vec::new(),
            encoder: None,
        }
    }

    fn open_segment(&mut self, settings: &FfmpegSettings) -> CaptureResult<()> {
        let index = self.segments.len();
        let segment = self.work_dir.join(format!("segment-{}.m4a", index));
        let args = settings.capture_args(&segment);

        tracing::info!("Starting FFmpeg capture: {:?}", args);

        let mut child = Command::new(&settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CaptureError::Launch(format!("{}: {}", settings.ffmpeg_path.display(), e))
            })?;

        // A device that cannot be opened makes FFmpeg exit right away
        if !settings.startup_grace.is_zero() {
            std::thread::sleep(settings.startup_grace);
        }
        if let Some(status) = child.try_wait()? {
            return Err(CaptureError::Encoder(format!(
                "FFmpeg exited during startup with {}",
                status
            )));
        }

        self.segments.push(segment);
        self.sessions.push(RecordingSession::new(index));
        self.encoder = Some(child);
        Ok(())
    }

    fn close_segment(&mut self, timeout: Duration) {
        if let Some(child) = self.encoder.take() {
            if let Err(e) = finish_encoder(child, timeout) {
                tracing::warn!("Segment {} did not close cleanly: {}", self.segments.len(), e);
            }
        }
        if let Some(session) = self.sessions.last_mut() {
            session.end();
            tracing::debug!(
                segment = session.index,
                started_at_ms = session.unix_start_ms,
                duration_ms = session.duration_ms,
                "Segment closed"
            );
        }
    }

    fn duration_ms(&self) -> f64 {
        self.sessions.iter().map(|s| s.elapsed_ms()).sum()
    }

    /// Segments that actually contain data
    fn written_segments(&self) -> Vec<PathBuf> {
        self.segments
            .iter()
            .filter(|path| fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false))
            .cloned()
            .collect()
    }

    fn discard(mut self) {
        if let Some(mut child) = self.encoder.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Err(e) = fs::remove_dir_all(&self.work_dir) {
            tracing::debug!("Failed to remove {:?}: {}", self.work_dir, e);
        }
    }
}

/// Microphone capture through FFmpeg child processes
pub struct FfmpegRecorder {
    settings: FfmpegSettings,
    options: CaptureOptions,
    active: Option<ActiveCapture>,
    last_recording: Option<PathBuf>,
    last_duration_ms: f64,
}

impl FfmpegRecorder {
    pub fn new(settings: FfmpegSettings, options: CaptureOptions) -> Self {
        tracing::debug!(background = options.background, "Creating FFmpeg recorder");
        Self {
            settings,
            options,
            active: None,
            last_recording: None,
            last_duration_ms: 0.0,
        }
    }

    fn output_path(&self) -> PathBuf {
        let name = format!("recording-{}.m4a", Utc::now().format("%Y%m%d-%H%M%S-%3f"));
        let output = self.settings.output_dir.join(name);
        std::path::absolute(&output).unwrap_or(output)
    }

    fn finalize(&self, capture: &ActiveCapture, output: &Path) -> CaptureResult<()> {
        let segments = capture.written_segments();
        match segments.as_slice() {
            [] => Err(CaptureError::Encoder("No audio captured".to_string())),
            [single] => Ok(fs::rename(single, output)?),
            _ => {
                let list = capture.work_dir.join("segments.txt");
                fs::write(&list, concat_list(&segments))?;

                let args = self.settings.concat_args(&list, output);
                tracing::info!("Joining {} segments: {:?}", segments.len(), args);

                let mut child = Command::new(&self.settings.ffmpeg_path)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| CaptureError::Launch(format!("Failed to run FFmpeg: {}", e)))?;

                let status = wait_with_deadline(&mut child, self.settings.stop_timeout)?;
                if !status.success() {
                    return Err(CaptureError::Encoder(format!(
                        "FFmpeg concat exited with {}",
                        status
                    )));
                }
                Ok(())
            }
        }
    }
}

impl RecordingCapability for FfmpegRecorder {
    fn start(&mut self) -> CaptureResult<bool> {
        if self.active.is_some() {
            return Ok(false);
        }

        // Concat lists resolve relative entries against the list's own
        // directory, so segment paths must be absolute
        let work_dir = std::path::absolute(
            self.settings
                .output_dir
                .join(format!(".capture-{}", Uuid::new_v4())),
        )?;
        fs::create_dir_all(&work_dir)?;

        let mut capture = ActiveCapture::new(work_dir);
        if let Err(e) = capture.open_segment(&self.settings) {
            capture.discard();
            return Err(e);
        }

        tracing::info!(background = self.options.background, "Capture started");
        self.active = Some(capture);
        Ok(true)
    }

    fn pause(&mut self) {
        let timeout = self.settings.stop_timeout;
        match self.active.as_mut() {
            Some(capture) if capture.encoder.is_some() => {
                capture.close_segment(timeout);
                tracing::info!("Capture paused");
            }
            _ => tracing::debug!("Pause ignored: not recording"),
        }
    }

    fn resume(&mut self) {
        let settings = &self.settings;
        match self.active.as_mut() {
            Some(capture) if capture.encoder.is_none() => match capture.open_segment(settings) {
                Ok(()) => tracing::info!("Capture resumed"),
                Err(e) => tracing::error!("Failed to resume capture: {}", e),
            },
            _ => tracing::debug!("Resume ignored: not paused"),
        }
    }

    fn stop(&mut self) -> Option<PathBuf> {
        let mut capture = self.active.take()?;
        capture.close_segment(self.settings.stop_timeout);
        self.last_duration_ms = capture.duration_ms();

        let output = self.output_path();
        let result = self.finalize(&capture, &output);
        capture.discard();

        match result {
            Ok(()) => {
                tracing::info!(
                    "Recording finalized at {:?} ({:.0}ms)",
                    output,
                    self.last_duration_ms
                );
                self.last_recording = Some(output.clone());
                Some(output)
            }
            Err(e) => {
                tracing::error!("Failed to finalize recording: {}", e);
                None
            }
        }
    }

    fn status(&self) -> RecordingStatus {
        match &self.active {
            None => RecordingStatus::Idle,
            Some(capture) if capture.encoder.is_some() => RecordingStatus::Recording,
            Some(_) => RecordingStatus::Paused,
        }
    }

    fn last_recording_path(&self) -> Option<PathBuf> {
        self.last_recording.clone()
    }

    fn duration_ms(&self) -> f64 {
        self.active
            .as_ref()
            .map(|c| c.duration_ms())
            .unwrap_or(self.last_duration_ms)
    }

    fn release(&mut self) {
        if let Some(capture) = self.active.take() {
            tracing::info!("Releasing active capture");
            capture.discard();
        }
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Builds [`FfmpegRecorder`]s from fixed settings
pub struct FfmpegCapabilityFactory {
    settings: FfmpegSettings,
}

impl FfmpegCapabilityFactory {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }
}

impl CapabilityFactory for FfmpegCapabilityFactory {
    fn create(&self, options: CaptureOptions) -> anyhow::Result<Box<dyn RecordingCapability>> {
        fs::create_dir_all(&self.settings.output_dir)?;
        Ok(Box::new(FfmpegRecorder::new(self.settings.clone(), options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(ffmpeg_path: PathBuf, output_dir: PathBuf) -> FfmpegSettings {
        FfmpegSettings {
            ffmpeg_path,
            input_format: "pulse".to_string(),
            input_device: "default".to_string(),
            bitrate_kbps: 128,
            sample_rate: 44_100,
            output_dir,
            stop_timeout: Duration::from_secs(5),
            startup_grace: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_capture_args_quality_profile() {
        let s = settings(PathBuf::from("ffmpeg"), PathBuf::from("/cache"));
        let args = s.capture_args(Path::new("/cache/segment-0.m4a"));

        let joined = args.join(" ");
        assert!(joined.contains("-f pulse -i default"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-ar 44100"));
        assert_eq!(args.last().map(String::as_str), Some("/cache/segment-0.m4a"));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[
            PathBuf::from("/tmp/a/segment-0.m4a"),
            PathBuf::from("/tmp/it's/segment-1.m4a"),
        ]);
        assert_eq!(
            list,
            "file '/tmp/a/segment-0.m4a'\nfile '/tmp/it'\\''s/segment-1.m4a'\n"
        );
    }

    #[test]
    fn test_missing_binary_fails_start() {
        let dir = tempdir().unwrap();
        let mut recorder = FfmpegRecorder::new(
            settings(dir.path().join("no-such-ffmpeg"), dir.path().to_path_buf()),
            CaptureOptions::default(),
        );

        assert!(matches!(recorder.start(), Err(CaptureError::Launch(_))));
        assert_eq!(recorder.status(), RecordingStatus::Idle);

        // The working directory is cleaned up after a failed start
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_idle_operations_are_noops() {
        let dir = tempdir().unwrap();
        let mut recorder = FfmpegRecorder::new(
            settings(PathBuf::from("ffmpeg"), dir.path().to_path_buf()),
            CaptureOptions::default(),
        );

        recorder.pause();
        recorder.resume();
        assert_eq!(recorder.status(), RecordingStatus::Idle);
        assert_eq!(recorder.stop(), None);
        assert_eq!(recorder.last_recording_path(), None);
        recorder.release();
        recorder.release();
    }

    /// A stand-in encoder. Capture writes its last argument and waits for
    /// 'q'; concat runs `concat_body` with `$list` set to the list file.
    #[cfg(unix)]
    fn stand_in(dir: &Path, concat_body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg");
        let body = format!(
            "#!/bin/sh\n\
             for last; do :; done\n\
             case \" $* \" in *\" concat \"*)\n\
             list=$(echo \"$*\" | sed 's/.* -i \\([^ ]*\\) .*/\\1/')\n\
             {}\n\
             printf 'audio' > \"$last\"\n\
             exit 0;;\n\
             esac\n\
             printf 'audio' > \"$last\"\n\
             read _ || true\n\
             exit 0\n",
            concat_body
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    /// Concat step that resolves list entries the way FFmpeg does and fails
    /// on a missing segment
    #[cfg(unix)]
    const RESOLVING_CONCAT: &str = "dir=$(dirname \"$list\")\n\
         while IFS= read -r line; do\n\
         f=${line#file \\'}; f=${f%\\'}\n\
         case \"$f\" in /*) ;; *) f=\"$dir/$f\";; esac\n\
         [ -f \"$f\" ] || exit 1\n\
         done < \"$list\"";

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path) -> PathBuf {
        stand_in(dir, RESOLVING_CONCAT)
    }

    #[cfg(unix)]
    #[test]
    fn test_pause_resume_stop_with_segments() {
        let bin = tempdir().unwrap();
        let out = tempdir().unwrap();
        let mut recorder = FfmpegRecorder::new(
            settings(fake_ffmpeg(bin.path()), out.path().to_path_buf()),
            CaptureOptions::default(),
        );

        assert!(recorder.start().unwrap());
        assert_eq!(recorder.status(), RecordingStatus::Recording);

        // A second start while active is refused
        assert!(!recorder.start().unwrap());

        recorder.pause();
        assert_eq!(recorder.status(), RecordingStatus::Paused);
        recorder.resume();
        assert_eq!(recorder.status(), RecordingStatus::Recording);

        let path = recorder.stop().expect("recording path");
        assert_eq!(recorder.status(), RecordingStatus::Idle);
        assert!(path.is_absolute());
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("m4a"));
        assert_eq!(recorder.last_recording_path(), Some(path.clone()));

        // Only the finished file remains in the output directory
        let entries: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_output_dir_joins_segments() {
        let bin = tempdir().unwrap();
        let out = tempfile::tempdir_in(".").unwrap();
        let relative = PathBuf::from(out.path().file_name().unwrap());
        assert!(relative.is_relative());

        let mut recorder = FfmpegRecorder::new(
            settings(fake_ffmpeg(bin.path()), relative),
            CaptureOptions::default(),
        );

        assert!(recorder.start().unwrap());
        assert!(recorder
            .active
            .as_ref()
            .is_some_and(|capture| capture.work_dir.is_absolute()));
        recorder.pause();
        recorder.resume();

        let path = recorder.stop().expect("recording path");
        assert!(path.is_absolute());
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_concat_is_killed() {
        let bin = tempdir().unwrap();
        let out = tempdir().unwrap();
        let mut s = settings(
            stand_in(bin.path(), "exec sleep 30"),
            out.path().to_path_buf(),
        );
        s.stop_timeout = Duration::from_millis(300);
        let mut recorder = FfmpegRecorder::new(s, CaptureOptions::default());

        recorder.start().unwrap();
        recorder.pause();
        recorder.resume();

        let started = Instant::now();
        assert_eq!(recorder.stop(), None);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(recorder.status(), RecordingStatus::Idle);
    }
}
