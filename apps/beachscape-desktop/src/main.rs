use anyhow::{Context, Result};
use beachscape_assets::{AssetError, AssetLoader};
use beachscape_render::{DriverConfig, FrameDriver, FrameScheduler, TickOutcome};
use beachscape_render_wgpu::{OrbitCamera, WgpuRenderer};
use beachscape_scene::{
    CaptureSlot, CubeImage, DioramaConfig, DioramaHandles, Model, Scene, TextureImage,
    TextureSlot, attach_model, build_diorama,
};
use clap::Parser;
use egui::Context as EguiContext;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser)]
#[command(name = "beachscape-desktop", about = "Beach diorama with mirrored spheres")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Asset directory (images/ and models/)
    #[arg(long, default_value = "./assets")]
    assets: PathBuf,

    /// Diorama config file (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial window width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 720)]
    height: u32,
}

/// Completed asset loads, forwarded from loader threads to the event loop.
enum AppEvent {
    Texture(TextureSlot, Result<TextureImage, AssetError>),
    Background(Result<CubeImage, AssetError>),
    Model(Result<Model, AssetError>),
}

/// Pixels an arrow key pans by.
const KEY_PAN_PIXELS: f32 = 7.0;

/// What a held mouse button does to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drag {
    Orbit,
    Pan,
}

#[derive(Debug, Clone, PartialEq)]
enum AssetStatus {
    Pending,
    Loaded,
    Failed(String),
}

fn slot_label(slot: TextureSlot) -> &'static str {
    match slot {
        TextureSlot::Sand => "sand",
        TextureSlot::Wall => "wall",
        TextureSlot::Metal => "metal",
        TextureSlot::Model(_) => "model texture",
    }
}

/// Kick off every asset load. Results come back as [`AppEvent`]s.
fn request_assets(loader: &AssetLoader, config: &DioramaConfig, proxy: &EventLoopProxy<AppEvent>) {
    let forward = |proxy: EventLoopProxy<AppEvent>, event: AppEvent| {
        if proxy.send_event(event).is_err() {
            tracing::debug!("event loop closed, dropping asset result");
        }
    };

    for (slot, path) in [
        (TextureSlot::Sand, &config.assets.sand),
        (TextureSlot::Wall, &config.assets.wall),
        (TextureSlot::Metal, &config.assets.metal),
    ] {
        let proxy = proxy.clone();
        loader.load_texture_async(path, move |result| {
            forward(proxy, AppEvent::Texture(slot, result));
        });
    }

    let bg_proxy = proxy.clone();
    loader.load_background_async(&config.assets.background, None, move |result| {
        forward(bg_proxy, AppEvent::Background(result));
    });

    let model_proxy = proxy.clone();
    loader.load_model_async(&config.assets.model, move |result| {
        forward(model_proxy, AppEvent::Model(result));
    });
}

/// Scene, driver and view state. Everything here lives on the event loop
/// thread.
struct AppState {
    config: DioramaConfig,
    scene: Scene,
    handles: DioramaHandles,
    driver: FrameDriver,
    camera: OrbitCamera,
    assets: BTreeMap<&'static str, AssetStatus>,
    last_capture: Option<CaptureSlot>,
    show_hud: bool,
    drag: Option<Drag>,
    last_cursor: Option<(f64, f64)>,
    viewport_height: f32,
}

impl AppState {
    fn new(config: DioramaConfig, width: u32, height: u32) -> Result<Self> {
        let (scene, handles) = build_diorama(&config).context("failed to build diorama")?;
        let driver = FrameDriver::new(DriverConfig::from_diorama(&config), handles.torus_knot);
        let camera = OrbitCamera::from_config(&config.camera, width as f32 / height.max(1) as f32);
        let assets = ["sand", "wall", "metal", "background", "model"]
            .into_iter()
            .map(|name| (name, AssetStatus::Pending))
            .collect();

        Ok(Self {
            config,
            scene,
            handles,
            driver,
            camera,
            assets,
            last_capture: None,
            show_hud: true,
            drag: None,
            last_cursor: None,
            viewport_height: height as f32,
        })
    }

    /// Attach a finished asset to the scene. Runs between ticks.
    fn apply(&mut self, event: AppEvent) {
        let (name, result): (&'static str, Result<(), String>) = match event {
            AppEvent::Texture(slot, result) => (
                slot_label(slot),
                result
                    .map(|image| self.scene.set_texture(slot, image))
                    .map_err(|e| e.to_string()),
            ),
            AppEvent::Background(result) => (
                "background",
                result
                    .map(|cube| self.scene.set_background(cube))
                    .map_err(|e| e.to_string()),
            ),
            AppEvent::Model(result) => (
                "model",
                result.map_err(|e| e.to_string()).and_then(|model| {
                    attach_model(&mut self.scene, model, &self.config.model)
                        .map(|ids| tracing::debug!(nodes = ids.len(), "model nodes attached"))
                        .map_err(|e| e.to_string())
                }),
            ),
        };

        let status = match result {
            Ok(()) => {
                tracing::info!(
                    asset = name,
                    frame = self.driver.frame_count(),
                    "asset attached"
                );
                AssetStatus::Loaded
            }
            Err(e) => {
                tracing::error!(asset = name, "asset failed: {e}");
                AssetStatus::Failed(e)
            }
        };
        self.assets.insert(name, status);
    }

    fn handle_key(&mut self, key: KeyCode, pressed: bool) {
        if !pressed {
            return;
        }
        let h = self.viewport_height;
        match key {
            KeyCode::F1 => self.show_hud = !self.show_hud,
            KeyCode::ArrowUp => self.camera.pan(0.0, KEY_PAN_PIXELS, h),
            KeyCode::ArrowDown => self.camera.pan(0.0, -KEY_PAN_PIXELS, h),
            KeyCode::ArrowLeft => self.camera.pan(KEY_PAN_PIXELS, 0.0, h),
            KeyCode::ArrowRight => self.camera.pan(-KEY_PAN_PIXELS, 0.0, h),
            _ => {}
        }
    }

    /// Left drag orbits, right drag pans. Any release ends the drag.
    fn mouse_button(&mut self, button: MouseButton, pressed: bool) {
        if !pressed {
            self.drag = None;
            return;
        }
        match button {
            MouseButton::Left => self.drag = Some(Drag::Orbit),
            MouseButton::Right => self.drag = Some(Drag::Pan),
            _ => {}
        }
    }

    fn cursor_moved(&mut self, x: f64, y: f64) {
        if let (Some(drag), Some((last_x, last_y))) = (self.drag, self.last_cursor) {
            let (dx, dy) = ((x - last_x) as f32, (y - last_y) as f32);
            let h = self.viewport_height;
            match drag {
                Drag::Orbit => self.camera.rotate(dx, dy, h),
                Drag::Pan => self.camera.pan(dx, dy, h),
            }
        }
        self.last_cursor = Some((x, y));
    }

    fn draw_hud(&self, ctx: &EguiContext, in_flight: usize) {
        if !self.show_hud {
            return;
        }

        egui::Window::new("Beachscape")
            .default_pos([12.0, 12.0])
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!("Frame: {}", self.driver.frame_count()));
                ui.label(match self.last_capture {
                    Some(slot) => format!("Last capture: {slot:?}"),
                    None => "Last capture: none".into(),
                });
                ui.label(format!(
                    "Nodes: {}  Revision: {}",
                    self.scene.node_count(),
                    self.scene.revision()
                ));
                if let Some(knot) = self.scene.get(self.handles.torus_knot) {
                    ui.label(format!("Knot rotation: {:.2}", knot.transform.rotation.x));
                }
                ui.label(format!("Camera distance: {:.1}", self.camera.radius));
                ui.separator();

                ui.heading("Assets");
                for (name, status) in &self.assets {
                    match status {
                        AssetStatus::Pending => ui.label(format!("{name}: loading")),
                        AssetStatus::Loaded => ui.label(format!("{name}: ok")),
                        AssetStatus::Failed(e) => {
                            ui.colored_label(egui::Color32::LIGHT_RED, format!("{name}: {e}"))
                        }
                    };
                }
                if in_flight > 0 {
                    ui.small(format!("{in_flight} load(s) in flight"));
                }

                ui.separator();
                ui.small("F1: Toggle HUD | LMB: Orbit | RMB/Arrows: Pan | Wheel: Zoom");
            });
    }
}

/// Window-bound GPU resources, created once the event loop is running.
struct Gpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    renderer: WgpuRenderer,
    egui_winit: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Gpu {
    fn new(
        event_loop: &ActiveEventLoop,
        size: PhysicalSize<u32>,
        diorama: &DioramaConfig,
        egui_ctx: &EguiContext,
    ) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Beachscape")
            .with_inner_size(size);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .context("failed to create window")?,
        );

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("failed to create surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("no compatible GPU adapter")?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("beachscape_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("failed to create device")?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .context("surface reports no texture formats")?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let renderer = WgpuRenderer::new(
            device.clone(),
            queue.clone(),
            surface_format,
            config.width,
            config.height,
            diorama.capture_resolution,
            diorama.lighting.shadow_map_size,
        );

        let egui_winit = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        tracing::info!(
            "GPU initialized with {} backend",
            adapter.get_info().backend.to_str()
        );

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            renderer,
            egui_winit,
            egui_renderer,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.config.width = size.width.max(1);
        self.config.height = size.height.max(1);
        self.surface.configure(&self.device, &self.config);
        self.renderer.resize(self.config.width, self.config.height);
    }

    fn paint_hud(
        &mut self,
        egui_ctx: &EguiContext,
        state: &AppState,
        in_flight: usize,
        view: &wgpu::TextureView,
    ) {
        let raw_input = self.egui_winit.take_egui_input(&self.window);
        let full_output = egui_ctx.run(raw_input, |ctx| {
            state.draw_hud(ctx, in_flight);
        });
        self.egui_winit
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: full_output.pixels_per_point,
        };

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("egui_encoder"),
            });
        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &paint_jobs,
            &screen_descriptor,
        );
        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("egui_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                })
                .forget_lifetime();
            self.egui_renderer
                .render(&mut pass, &paint_jobs, &screen_descriptor);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

/// Reschedules the frame driver through winit's redraw request.
struct RedrawScheduler<'a>(&'a Window);

impl FrameScheduler for RedrawScheduler<'_> {
    fn request_next_frame(&self) {
        self.0.request_redraw();
    }
}

struct App {
    state: AppState,
    loader: AssetLoader,
    initial_size: PhysicalSize<u32>,
    gpu: Option<Gpu>,
    egui_ctx: EguiContext,
}

impl App {
    fn redraw(&mut self) {
        let Some(gpu) = self.gpu.as_mut() else {
            return;
        };

        let output = match gpu.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.surface.configure(&gpu.device, &gpu.config);
                gpu.window.request_redraw();
                return;
            }
            Err(e) => {
                tracing::error!("surface error: {e}");
                gpu.window.request_redraw();
                return;
            }
        };

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        gpu.renderer.set_target(
            output
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        );

        self.state.camera.update();
        let render_view = self.state.camera.render_view();
        let scheduler = RedrawScheduler(&gpu.window);
        match self.state.driver.tick(
            &mut self.state.scene,
            &render_view,
            &mut gpu.renderer,
            &scheduler,
        ) {
            TickOutcome::Rendered { capture, .. } => self.state.last_capture = Some(capture),
            TickOutcome::Stopped => return,
        }

        gpu.paint_hud(&self.egui_ctx, &self.state, self.loader.in_flight(), &view);
        output.present();
    }
}

impl ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }

        match Gpu::new(
            event_loop,
            self.initial_size,
            &self.state.config,
            &self.egui_ctx,
        ) {
            Ok(gpu) => {
                let size = gpu.window.inner_size();
                self.state.camera.aspect = size.width as f32 / size.height.max(1) as f32;
                self.state.viewport_height = size.height as f32;
                // First frame; every tick schedules the next one.
                gpu.window.request_redraw();
                self.gpu = Some(gpu);
            }
            Err(e) => {
                tracing::error!("failed to initialize graphics: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: AppEvent) {
        self.state.apply(event);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        // Releases always end a drag, even when egui swallows the event.
        if let WindowEvent::MouseInput {
            state: ElementState::Released,
            button,
            ..
        } = event
        {
            self.state.mouse_button(button, false);
        }

        if let Some(gpu) = &mut self.gpu {
            let response = gpu.egui_winit.on_window_event(&gpu.window, &event);
            if response.consumed {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                self.state.driver.stop_token().cancel();
                tracing::info!(frames = self.state.driver.frame_count(), "closing");
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(new_size);
                    self.state.camera.aspect =
                        gpu.config.width as f32 / gpu.config.height as f32;
                    self.state.viewport_height = gpu.config.height as f32;
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: key_state,
                        ..
                    },
                ..
            } => {
                self.state
                    .handle_key(key, key_state == ElementState::Pressed);
            }
            WindowEvent::MouseInput {
                button,
                state: ElementState::Pressed,
                ..
            } => {
                self.state.mouse_button(button, true);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.state.cursor_moved(position.x, position.y);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 50.0,
                };
                self.state.camera.zoom(steps);
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("beachscape-desktop starting");

    let config = match &cli.config {
        Some(path) => DioramaConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DioramaConfig::default(),
    };

    let event_loop = EventLoop::<AppEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let loader = AssetLoader::new(&cli.assets);
    request_assets(&loader, &config, &event_loop.create_proxy());

    let mut app = App {
        state: AppState::new(config, cli.width, cli.height)?,
        loader,
        initial_size: PhysicalSize::new(cli.width, cli.height),
        gpu: None,
        egui_ctx: EguiContext::default(),
    };
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beachscape_common::Rgb;
    use beachscape_render::{ManualScheduler, RecordingRenderer, RenderView};
    use beachscape_scene::{ModelPrimitive, geometry};
    use glam::Mat4;

    fn state() -> AppState {
        AppState::new(DioramaConfig::default(), 1280, 720).unwrap()
    }

    #[test]
    fn texture_result_fills_slot() {
        let mut state = state();
        state.apply(AppEvent::Texture(
            TextureSlot::Sand,
            Ok(TextureImage::solid(2, 2, [200, 180, 120, 255])),
        ));
        assert_eq!(state.assets["sand"], AssetStatus::Loaded);
        assert!(state.scene.texture(TextureSlot::Sand).is_some());
    }

    #[test]
    fn failed_load_is_recorded_and_scene_untouched() {
        let mut state = state();
        let revision = state.scene.revision();
        state.apply(AppEvent::Background(Err(AssetError::InvalidImage(
            "zero width".into(),
        ))));
        assert!(matches!(state.assets["background"], AssetStatus::Failed(_)));
        assert_eq!(state.scene.revision(), revision);
    }

    #[test]
    fn right_drag_pans_and_left_drag_orbits() {
        let mut state = state();
        state.camera.damping_factor = 0.0;
        let azimuth = state.camera.azimuth;

        state.cursor_moved(100.0, 100.0);
        state.mouse_button(MouseButton::Right, true);
        state.cursor_moved(150.0, 100.0);
        state.camera.update();
        assert!(state.camera.target.x < 0.0);
        assert_eq!(state.camera.azimuth, azimuth);

        state.mouse_button(MouseButton::Right, false);
        state.mouse_button(MouseButton::Left, true);
        state.cursor_moved(200.0, 100.0);
        state.camera.update();
        assert_ne!(state.camera.azimuth, azimuth);
    }

    #[test]
    fn release_ends_drag_for_any_button() {
        let mut state = state();
        state.camera.damping_factor = 0.0;
        state.mouse_button(MouseButton::Left, true);
        // The release arrives for a different button, as after a HUD click.
        state.mouse_button(MouseButton::Middle, false);
        assert_eq!(state.drag, None);

        let azimuth = state.camera.azimuth;
        state.cursor_moved(10.0, 10.0);
        state.cursor_moved(300.0, 10.0);
        state.camera.update();
        assert_eq!(state.camera.azimuth, azimuth);
    }

    #[test]
    fn arrow_keys_pan_the_camera() {
        let mut state = state();
        state.camera.damping_factor = 0.0;
        state.handle_key(KeyCode::ArrowUp, true);
        state.camera.update();
        assert!(state.camera.target.y > 0.0);

        state.handle_key(KeyCode::F1, true);
        assert!(!state.show_hud);
    }

    #[test]
    fn model_attached_mid_run_keeps_frame_cadence() {
        let mut state = state();
        let mut renderer = RecordingRenderer::new();
        let scheduler = ManualScheduler::new();
        let view = RenderView::default();
        for _ in 0..100 {
            state
                .driver
                .tick(&mut state.scene, &view, &mut renderer, &scheduler);
        }

        let nodes = state.scene.node_count();
        state.apply(AppEvent::Model(Ok(Model {
            name: "beach".into(),
            primitives: vec![ModelPrimitive {
                name: "palm".into(),
                mesh: geometry::sphere(1.0, 8, 6),
                color: Rgb::WHITE,
                base_color: Some(TextureImage::solid(1, 1, [0, 255, 0, 255])),
                parent: Mat4::IDENTITY,
            }],
        })));
        assert_eq!(state.assets["model"], AssetStatus::Loaded);
        assert_eq!(state.scene.node_count(), nodes + 1);
        assert!(state.scene.texture(TextureSlot::Model(0)).is_some());

        let outcome = state
            .driver
            .tick(&mut state.scene, &view, &mut renderer, &scheduler);
        assert_eq!(
            outcome,
            TickOutcome::Rendered {
                frame: 100,
                capture: CaptureSlot::A
            }
        );
    }
}
