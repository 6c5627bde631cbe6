// SPDX-License-Identifier: MPL-2.0

//! GStreamer decode source.
//!
//! Frames are pulled synchronously from an `appsink`; the playback thread does
//! its own pacing, so the sink does not sync to the clock and never drops.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use gstreamer::prelude::*;
use tracing::{debug, info, warn};

use super::{DEFAULT_FRAME_INTERVAL, DecodeSource, OutputSize, Pull, SourceError};
use crate::frame::{BYTES_PER_PIXEL, DecodedFrame};

/// How long prerolling may take before the media is considered unplayable.
const PREROLL_TIMEOUT_SECS: u64 = 5;

type MappedBuffer = gstreamer::MappedBuffer<gstreamer::buffer::Readable>;

pub(super) struct GstSource {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    source_path: PathBuf,
    native: (u32, u32),
    frame_interval: Duration,
    output: OutputSize,
    playing: bool,
    /// Buffer backing the most recently pulled frame.
    mapped: Option<MappedBuffer>,
    loops: u32,
}

impl GstSource {
    pub(super) fn open(path: &Path) -> Result<Self, SourceError> {
        gstreamer::init().map_err(|why| SourceError::Backend(why.to_string()))?;

        let unsupported = |reason: String| SourceError::Unsupported {
            path: path.to_path_buf(),
            reason,
        };

        let (pipeline, appsink) = build(path, OutputSize::Native).map_err(unsupported)?;
        let info = match preroll(&pipeline, &appsink) {
            Ok(info) => info,
            Err(why) => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(unsupported(why));
            }
        };

        let frame_interval = frame_interval(&info);

        info!(
            path = %path.display(),
            resolution = format!("{}x{}", info.width(), info.height()),
            interval_ms = frame_interval.as_millis(),
            "Opened video"
        );

        Ok(Self {
            pipeline,
            appsink,
            source_path: path.to_path_buf(),
            native: (info.width(), info.height()),
            frame_interval,
            output: OutputSize::Native,
            playing: false,
            mapped: None,
            loops: 0,
        })
    }

    fn seek_to_start(&mut self) -> Result<(), SourceError> {
        let seek_flags = gstreamer::SeekFlags::FLUSH | gstreamer::SeekFlags::KEY_UNIT;

        self.pipeline
            .seek_simple(seek_flags, gstreamer::ClockTime::ZERO)
            .map_err(|why| SourceError::Decode(format!("failed to rewind: {why}")))
    }

    /// First error posted on the pipeline bus, if any.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop() {
            use gstreamer::MessageView;

            match msg.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "{} ({})",
                        err.error(),
                        err.src()
                            .map(|s| s.path_string().to_string())
                            .unwrap_or_default()
                    ));
                }
                MessageView::Warning(warning) => {
                    warn!(
                        src = ?warning.src().map(|s| s.path_string()),
                        error = %warning.error(),
                        "GStreamer pipeline warning"
                    );
                }
                _ => {}
            }
        }
        None
    }
}

impl DecodeSource for GstSource {
    fn native_resolution(&self) -> (u32, u32) {
        self.native
    }

    fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    fn configure_output(&mut self, size: OutputSize) -> Result<(), SourceError> {
        if size == self.output {
            return Ok(());
        }

        let configure = |reason: String| SourceError::Configure {
            requested: size,
            reason,
        };

        if let OutputSize::Scaled { width, height } = size {
            if width == 0 || height == 0 {
                return Err(configure("empty output size".into()));
            }
        }

        let (pipeline, appsink) = build(&self.source_path, size).map_err(configure)?;
        let info = match preroll(&pipeline, &appsink) {
            Ok(info) => info,
            Err(why) => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(configure(why));
            }
        };

        debug!(
            path = %self.source_path.display(),
            requested = ?size,
            delivered = format!("{}x{}", info.width(), info.height()),
            "Reconfigured video output"
        );

        self.mapped = None;
        let _ = self.pipeline.set_state(gstreamer::State::Null);
        self.pipeline = pipeline;
        self.appsink = appsink;
        self.output = size;
        self.playing = false;

        Ok(())
    }

    fn pull_frame(&mut self, looping: bool) -> Result<Pull<'_>, SourceError> {
        // Return the previous buffer to the pool before asking for another.
        self.mapped = None;

        if !self.playing {
            self.pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|why| SourceError::Decode(format!("failed to start pipeline: {why}")))?;
            self.playing = true;
        }

        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) if self.appsink.is_eos() => {
                if !looping {
                    debug!(path = %self.source_path.display(), "Video EOS");
                    return Ok(Pull::EndOfStream);
                }

                self.loops += 1;
                debug!(
                    loop_num = self.loops,
                    path = %self.source_path.display(),
                    "Video EOS, seeking to start"
                );
                self.seek_to_start()?;
                return Ok(Pull::Rewound);
            }
            Err(why) => {
                let reason = self.bus_error().unwrap_or_else(|| why.to_string());
                return Err(SourceError::Decode(reason));
            }
        };

        let caps = sample
            .caps()
            .ok_or_else(|| SourceError::Decode("sample without caps".into()))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|why| SourceError::Decode(why.to_string()))?;
        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| SourceError::Decode("sample without buffer".into()))?;
        let mapped = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| SourceError::Decode("failed to map buffer".into()))?;

        let width = info.width();
        let height = info.height();
        let offset = info.offset().first().copied().unwrap_or(0);
        let stride = info
            .stride()
            .first()
            .and_then(|stride| usize::try_from(*stride).ok())
            .unwrap_or(width as usize * BYTES_PER_PIXEL);

        let expected = offset + stride * height.saturating_sub(1) as usize
            + width as usize * BYTES_PER_PIXEL;
        if mapped.as_slice().len() < expected {
            return Err(SourceError::Decode(format!(
                "buffer of {} bytes is too small for {width}x{height} frame",
                mapped.as_slice().len()
            )));
        }

        let mapped = self.mapped.insert(mapped);
        Ok(Pull::Frame(DecodedFrame {
            pixels: &mapped.as_slice()[offset..],
            stride,
            width,
            height,
        }))
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.mapped = None;
        if let Err(why) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(?why, path = %self.source_path.display(), "Failed to stop video pipeline on drop");
        }
    }
}

fn pipeline_description(path: &Path, size: OutputSize) -> Result<String, String> {
    let path_str = path
        .to_str()
        .ok_or_else(|| format!("Invalid path: {}", path.display()))?;
    let escaped_path = path_str.replace('\\', "\\\\").replace('"', "\\\"");

    let caps = match size {
        OutputSize::Native => "video/x-raw,format=BGRx".to_owned(),
        OutputSize::Scaled { width, height } => format!(
            "video/x-raw,format=BGRx,width={width},height={height},pixel-aspect-ratio=1/1"
        ),
    };

    Ok(format!(
        concat!(
            "filesrc location=\"{path}\" ! ",
            "decodebin ! ",
            "videoconvert ! ",
            "videoscale ! ",
            "{caps} ! ",
            "appsink name=sink sync=false max-buffers=4 drop=false"
        ),
        path = escaped_path,
        caps = caps,
    ))
}

fn build(
    path: &Path,
    size: OutputSize,
) -> Result<(gstreamer::Pipeline, gstreamer_app::AppSink), String> {
    let description = pipeline_description(path, size)?;
    debug!(pipeline = %description, "Creating GStreamer pipeline");

    let pipeline = gstreamer::parse::launch(&description)
        .map_err(|why| why.to_string())?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| "Failed to create pipeline".to_owned())?;

    let appsink = pipeline
        .by_name("sink")
        .ok_or_else(|| "Failed to get appsink from pipeline".to_owned())?
        .downcast::<gstreamer_app::AppSink>()
        .map_err(|_| "Element 'sink' is not an AppSink".to_owned())?;

    Ok((pipeline, appsink))
}

/// Brings the pipeline to `Paused` and reads the negotiated caps.
fn preroll(
    pipeline: &gstreamer::Pipeline,
    appsink: &gstreamer_app::AppSink,
) -> Result<gstreamer_video::VideoInfo, String> {
    let bus_error = || {
        pipeline.bus().and_then(|bus| {
            bus.pop_filtered(&[gstreamer::MessageType::Error])
                .and_then(|msg| match msg.view() {
                    gstreamer::MessageView::Error(err) => Some(err.error().to_string()),
                    _ => None,
                })
        })
    };

    if pipeline.set_state(gstreamer::State::Paused).is_err() {
        return Err(bus_error().unwrap_or_else(|| "failed to pause pipeline".into()));
    }

    let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if result.is_err() || state != gstreamer::State::Paused {
        return Err(bus_error().unwrap_or_else(|| "pipeline failed to preroll".into()));
    }

    let caps = appsink
        .static_pad("sink")
        .and_then(|pad| pad.current_caps())
        .ok_or_else(|| "no negotiated caps on appsink".to_owned())?;

    debug!(caps = %caps, "Got current caps from pad");

    gstreamer_video::VideoInfo::from_caps(&caps).map_err(|why| why.to_string())
}

fn frame_interval(info: &gstreamer_video::VideoInfo) -> Duration {
    let fps = info.fps();
    interval_from_fps(fps.numer(), fps.denom()).unwrap_or_else(|| {
        debug!("No framerate field in caps");
        DEFAULT_FRAME_INTERVAL
    })
}

/// The stream's own frame interval, or `None` for a missing or variable rate.
fn interval_from_fps(numer: i32, denom: i32) -> Option<Duration> {
    (numer > 0 && denom > 0)
        .then(|| Duration::from_secs_f64(f64::from(denom) / f64::from(numer)))
}
