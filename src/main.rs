// SPDX-License-Identifier: MPL-2.0

mod draw;
mod frame;
mod frame_queue;
mod geometry;
mod layer_sink;
mod pacer;
mod presenter;
mod registry;
mod scaler;
mod session;
mod source;
mod target;
#[cfg(test)]
mod testing;

use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::Duration,
};

use calloop::{
    EventLoop, channel, ping,
    signals::{Signal, Signals},
    timer::{TimeoutAction, Timer},
};
use cosmic_config::CosmicConfigEntry;
use eyre::{WrapErr, eyre};
use motion_bg_config::{Config, Entry, state::State};
use sctk::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, delegate_shm,
    output::{OutputHandler, OutputState},
    reexports::{
        calloop_wayland_source::WaylandSource,
        client::{
            Connection, QueueHandle,
            globals::registry_queue_init,
            protocol::{
                wl_output::{self, WlOutput},
                wl_surface,
            },
        },
    },
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::{
        WaylandSurface,
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
    },
    shm::{Shm, ShmHandler, slot::SlotPool},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    frame_queue::{FrameQueue, SharedFrameQueue},
    layer_sink::{Filters, LayerSink},
    presenter::SharedSurface,
    registry::SessionRegistry,
    target::{DiscoveredOutput, TargetId, Targets},
};

/// How often frame queue statistics are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct MotionBgLayer {
    target: TargetId,
    layer: LayerSurface,
    wl_output: WlOutput,
    pool: Option<SlotPool>,
    configured: bool,
}

pub struct MotionBg {
    registry_state: RegistryState,
    output_state: OutputState,
    compositor_state: CompositorState,
    shm_state: Shm,
    layer_state: LayerShell,
    qh: QueueHandle<MotionBg>,

    exit: bool,
    layers: Vec<MotionBgLayer>,
    targets: Targets,
    surface: SharedSurface,
    queue: SharedFrameQueue,
    filters: Filters,
    sessions: SessionRegistry,
    config: Config,
    config_helper: Option<cosmic_config::Config>,
    state_helper: Option<cosmic_config::Config>,
}

fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_logger();

    let config_helper = match Config::helper() {
        Ok(helper) => Some(helper),
        Err(why) => {
            warn!(?why, "Config helper unavailable, falling back to defaults");
            None
        }
    };

    let config = match config_helper.as_ref().map(Config::load) {
        Some(Ok(conf)) => conf,
        Some(Err(why)) => {
            warn!(?why, "Config file error, falling back to defaults");
            Config::default()
        }
        None => Config::default(),
    };

    let conn = Connection::connect_to_env().wrap_err("failed to connect to wayland")?;
    let (globals, mut event_queue) = registry_queue_init::<MotionBg>(&conn)?;
    let qh = event_queue.handle();

    let mut event_loop: EventLoop<'static, MotionBg> = EventLoop::try_new()?;

    let queue: SharedFrameQueue = Arc::new(FrameQueue::new());
    let (frame_ping, frame_ping_source) = ping::make_ping()?;
    let filters = Filters::default();
    let surface = SharedSurface::new(
        LayerSink::new(Arc::clone(&queue), frame_ping, filters.clone()),
        config.present_timeout(),
    );

    let mut bg_state = MotionBg {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
        compositor_state: CompositorState::bind(&globals, &qh)
            .wrap_err("wl_compositor not available")?,
        shm_state: Shm::bind(&globals, &qh).wrap_err("wl_shm not available")?,
        layer_state: LayerShell::bind(&globals, &qh)
            .wrap_err("wlr-layer-shell not available")?,
        qh: qh.clone(),
        exit: false,
        layers: Vec::new(),
        targets: Targets::default(),
        sessions: SessionRegistry::new(&Targets::default(), &surface),
        surface,
        queue,
        filters,
        config,
        config_helper,
        state_helper: State::state().ok(),
    };

    // The first roundtrip announces the outputs, the second delivers their info.
    event_queue.roundtrip(&mut bg_state)?;
    event_queue.roundtrip(&mut bg_state)?;

    let outputs = bg_state.discover_outputs()?;
    for target in bg_state.targets.iter() {
        info!(
            output = target.name,
            size = format!("{}x{}", target.width, target.height),
            offset = format!("+{}+{}", target.x_offset, target.y_offset),
            primary = target.primary,
            "Discovered display"
        );
    }

    let (surface_width, surface_height) = bg_state.targets.surface_size();
    info!(
        size = format!("{surface_width}x{surface_height}"),
        primary = ?bg_state.targets.primary().map(|target| target.name.as_str()),
        "Compositing surface"
    );

    WaylandSource::new(conn.clone(), event_queue)
        .insert(event_loop.handle())
        .map_err(|why| eyre!("failed to insert wayland source: {}", why.error))?;

    // Block the signals before any playback or decoder thread exists, so every
    // thread inherits the mask and delivery is left to the event loop.
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    event_loop
        .handle()
        .insert_source(signals, |event, _, state| {
            info!(signal = ?event.signal(), "Shutting down");
            state.exit = true;
        })
        .map_err(|why| eyre!("failed to insert signal source: {}", why.error))?;

    event_loop
        .handle()
        .insert_source(frame_ping_source, |_, _, state| state.draw_pending())
        .map_err(|why| eyre!("failed to insert frame source: {}", why.error))?;

    event_loop
        .handle()
        .insert_source(Timer::from_duration(STATS_INTERVAL), |_, _, state| {
            let stats = state.queue.stats();
            debug!(
                pushed = stats.frames_pushed,
                replaced = stats.frames_replaced,
                drawn = stats.frames_taken,
                "Frame queue statistics"
            );
            TimeoutAction::ToDuration(STATS_INTERVAL)
        })
        .map_err(|why| eyre!("failed to insert stats timer: {}", why.error))?;

    let (config_tx, config_rx) = channel::sync_channel::<Vec<String>>(4);
    event_loop
        .handle()
        .insert_source(config_rx, |event, _, state| {
            if let channel::Event::Msg(keys) = event {
                state.reload_config(&keys);
            }
        })
        .map_err(|why| eyre!("failed to insert config source: {}", why.error))?;

    let _config_watcher = bg_state.config_helper.as_ref().and_then(|helper| {
        helper
            .watch(move |_helper, keys| {
                // A full channel already has a reload pending.
                let _ = config_tx.try_send(keys.to_vec());
            })
            .map_err(|why| warn!(?why, "Failed to watch config"))
            .ok()
    });

    for (id, wl_output) in outputs {
        bg_state.create_layer(id, wl_output);
    }
    bg_state.apply_config();

    while !bg_state.exit {
        event_loop.dispatch(None, &mut bg_state)?;
    }

    bg_state.sessions.stop_all();
    bg_state.queue.close();

    let stats = bg_state.queue.stats();
    info!(
        pushed = stats.frames_pushed,
        replaced = stats.frames_replaced,
        drawn = stats.frames_taken,
        "Stopped playback"
    );

    Ok(())
}

impl MotionBg {
    /// Turns the announced outputs into the fixed set of playback targets.
    fn discover_outputs(&mut self) -> eyre::Result<Vec<(TargetId, WlOutput)>> {
        let mut by_name = HashMap::new();
        let mut discovered = Vec::new();

        for wl_output in self.output_state.outputs() {
            let Some(info) = self.output_state.info(&wl_output) else {
                continue;
            };

            let name = info
                .name
                .clone()
                .unwrap_or_else(|| format!("output-{}", info.id));
            let (x, y) = info.logical_position.unwrap_or((0, 0));
            let (width, height) = info.logical_size.unwrap_or((0, 0));

            by_name.insert(name.clone(), wl_output);
            discovered.push(DiscoveredOutput {
                name,
                x,
                y,
                width,
                height,
                primary: false,
            });
        }

        self.targets = Targets::discover(discovered)?;
        self.sessions = SessionRegistry::new(&self.targets, &self.surface);

        if let Some(primary) = self.sessions.primary() {
            debug!(output = primary.target().name, "Primary display");
        }

        Ok(self
            .targets
            .iter()
            .filter_map(|target| Some((target.id, by_name.remove(&target.name)?)))
            .collect())
    }

    fn create_layer(&mut self, target: TargetId, wl_output: WlOutput) {
        let surface = self.compositor_state.create_surface(&self.qh);

        let layer = self.layer_state.create_layer_surface(
            &self.qh,
            surface,
            Layer::Background,
            Some("wallpaper"),
            Some(&wl_output),
        );

        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.commit();

        self.layers.push(MotionBgLayer {
            target,
            layer,
            wl_output,
            pool: None,
            configured: false,
        });
    }

    /// Starts every target that has a configured entry.
    fn apply_config(&mut self) {
        let targets: Vec<(TargetId, String)> = self
            .targets
            .iter()
            .map(|target| (target.id, target.name.clone()))
            .collect();

        for (id, name) in targets {
            match self.config.entry_for(&name).cloned() {
                Some(entry) => self.play_entry(id, &name, &entry),
                None => debug!(output = name, "No media configured"),
            }
        }
    }

    fn play_entry(&mut self, id: TargetId, name: &str, entry: &Entry) {
        let media = match source::open(&entry.source) {
            Ok(media) => media,
            Err(why) => {
                error!(output = name, path = %entry.source.display(), ?why, "Failed to open media");
                return;
            }
        };

        self.filters.set(id, entry.filter_method);

        match self.sessions.play(id, media, entry.fit, entry.looping) {
            Ok(negotiated) => {
                info!(
                    output = name,
                    path = %entry.source.display(),
                    fit = ?negotiated.fit,
                    looping = entry.looping,
                    "Playing"
                );
                self.save_state(name, &entry.source);
            }
            Err(why) => {
                error!(output = name, path = %entry.source.display(), ?why, "Failed to start playback");
            }
        }
    }

    /// Restarts the targets whose entry changed.
    fn reload_config(&mut self, keys: &[String]) {
        debug!(?keys, "Config changed");

        let Some(helper) = self.config_helper.as_ref() else {
            return;
        };

        let config = match Config::load(helper) {
            Ok(config) => config,
            Err(why) => {
                warn!(?why, "Failed to reload config");
                return;
            }
        };

        let old = std::mem::replace(&mut self.config, config);

        if old.present_timeout_ms != self.config.present_timeout_ms {
            warn!("The present timeout takes effect after a restart");
        }

        let targets: Vec<(TargetId, String)> = self
            .targets
            .iter()
            .map(|target| (target.id, target.name.clone()))
            .collect();

        for (id, name) in targets {
            let entry = self.config.entry_for(&name).cloned();
            if entry.as_ref() == old.entry_for(&name) {
                continue;
            }

            match entry {
                Some(entry) => self.play_entry(id, &name, &entry),
                None => {
                    info!(output = name, "Media removed from config");
                    if let Err(why) = self.sessions.stop(id) {
                        error!(output = name, ?why, "Failed to stop playback");
                    }
                }
            }
        }
    }

    fn save_state(&self, output: &str, source: &Path) {
        let Some(helper) = self.state_helper.as_ref() else {
            return;
        };

        let mut state = State::get_entry(helper).unwrap_or_default();
        state.record(output, source.to_path_buf());
        if let Err(why) = state.write_entry(helper) {
            warn!(?why, "Failed to write state");
        }
    }

    /// Draws the newest frame of every target that has one.
    fn draw_pending(&mut self) {
        for frame in self.queue.take_all() {
            if let Some(layer) = self
                .layers
                .iter_mut()
                .find(|layer| layer.target == frame.target && layer.configured)
            {
                if let Some(pool) = layer.pool.as_mut() {
                    match draw::canvas(pool, &frame) {
                        Ok(buffer) => draw::layer_surface(
                            &layer.layer,
                            &self.qh,
                            &buffer,
                            (frame.width as i32, frame.height as i32),
                        ),
                        Err(why) => error!(?why, "Failed to create buffer"),
                    }
                }
            }

            self.queue.recycle(frame.pixels);
        }
    }
}

impl CompositorHandler for MotionBg {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for MotionBg {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        wl_output: wl_output::WlOutput,
    ) {
        // Targets are fixed once discovery has run.
        if !self.targets.is_empty() {
            let name = self
                .output_state
                .info(&wl_output)
                .and_then(|info| info.name);
            info!(?name, "Ignoring output connected after startup");
        }
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _output: wl_output::WlOutput,
    ) {
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        let Some(position) = self.layers.iter().position(|l| l.wl_output == output) else {
            return;
        };

        let layer = self.layers.remove(position);
        let name = self
            .targets
            .get(layer.target)
            .map(|target| target.name.clone())
            .unwrap_or_default();

        warn!(output = name, "Display removed, stopping its playback");
        if let Err(why) = self.sessions.stop(layer.target) {
            error!(output = name, ?why, "Failed to stop playback");
        }
    }
}

impl LayerShellHandler for MotionBg {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, _layer: &LayerSurface) {
        self.exit = true;
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let Some(bg_layer) = self.layers.iter_mut().find(|l| &l.layer == layer) else {
            return;
        };

        let (width, height) = configure.new_size;
        if let Some(target) = self.targets.get(bg_layer.target) {
            if (target.width, target.height) != (width, height) {
                debug!(
                    output = target.name,
                    logical = format!("{}x{}", target.width, target.height),
                    configured = format!("{width}x{height}"),
                    "Layer size differs from the output's logical size"
                );
            }
        }

        let len = (width as usize * height as usize * 4).max(4);
        if let Some(pool) = bg_layer.pool.as_mut() {
            if let Err(why) = pool.resize(len) {
                error!(?why, "Failed to resize the pool");
            }
        } else {
            match SlotPool::new(len, &self.shm_state) {
                Ok(pool) => bg_layer.pool = Some(pool),
                Err(why) => error!(?why, "Failed to create pool"),
            }
        }

        bg_layer.configured = true;
    }
}

impl ShmHandler for MotionBg {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm_state
    }
}

delegate_compositor!(MotionBg);
delegate_output!(MotionBg);
delegate_shm!(MotionBg);

delegate_layer!(MotionBg);

delegate_registry!(MotionBg);

impl ProvidesRegistryState for MotionBg {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }
    registry_handlers![OutputState];
}
