use std::any::Any;
use std::env;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::info;
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use deferred_pipeline::app::{load_scene, print_summary, summarize, UpdateThread};
use deferred_pipeline::{
    Camera, PipelineSettings, RenderContext, RenderToggles, Renderable, Renderer, SharedScene,
};

const WINDOW_SIZE: (u32, u32) = (1280, 720);

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let description = load_scene(options.scene.as_deref())?;
    let mut settings = PipelineSettings::default();
    description.settings.apply(&mut settings);
    if let Some(samples) = options.msaa {
        settings.msaa_samples = samples;
    }
    if let Some(samples) = options.ssao_samples {
        settings.ssao.samples = samples;
    }
    settings.validate().context("invalid pipeline settings")?;

    let graph = description.build_graph().context("failed to build scene graph")?;
    let camera = description
        .build_camera(&settings.camera)
        .context("failed to place camera")?;
    println!(
        "Loaded scene with {} objects ({} lights)",
        description.objects.len(),
        description.lights().count()
    );

    let aspect = WINDOW_SIZE.0 as f32 / WINDOW_SIZE.1 as f32;
    if options.summary_only {
        let mut camera = camera;
        let summary = summarize(&graph, &mut camera, &settings, aspect)?;
        print_summary(&summary, &settings);
        return Ok(());
    }

    let scene = SharedScene::new(graph);
    if options.headless {
        return run_headless(scene, camera, settings, options.frames.unwrap_or(1));
    }

    let fallback_scene = scene.clone();
    let fallback_camera = camera.clone();
    let fallback_settings = settings.clone();
    match run_interactive(scene, camera, settings, options.frames) {
        Ok(()) => Ok(()),
        Err(err) if err.downcast_ref::<WindowInitError>().is_some() => {
            eprintln!(
                "{err}. Falling back to --summary-only mode \
                 (set DISPLAY or install X11 libs to enable rendering)."
            );
            let mut camera = fallback_camera;
            let summary =
                summarize(&fallback_scene.read(), &mut camera, &fallback_settings, aspect)?;
            print_summary(&summary, &fallback_settings);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn run_headless(
    scene: SharedScene,
    mut camera: Camera,
    settings: PipelineSettings,
    frames: u32,
) -> Result<()> {
    let mut renderer = block_on(Renderer::new_headless(WINDOW_SIZE.0, WINDOW_SIZE.1, settings))
        .context("failed to initialize headless renderer")?;
    let toggles = RenderToggles::default();
    let delta = 1.0 / f64::from(deferred_pipeline::app::UPDATE_HZ);
    for frame in 0..frames {
        scene.update(delta);
        let graph = scene.read();
        let report = renderer.render(RenderContext {
            delta,
            camera: &mut camera,
            scene: &*graph,
            toggles,
        })?;
        println!(
            "frame {frame}: {} draws, {} culled, {} shadow light(s), exposure {:.3}",
            report.draws, report.culled, report.shadow_lights, report.exposure
        );
    }
    if let Some(average) = renderer.average_colour() {
        println!("average colour ({:.3}, {:.3}, {:.3})", average.x, average.y, average.z);
    }
    renderer.dispose();
    scene.write().dispose();
    Ok(())
}

fn run_interactive(
    scene: SharedScene,
    camera: Camera,
    settings: PipelineSettings,
    frames: Option<u32>,
) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;

    let mut app = AppState {
        updater: UpdateThread::spawn(scene.clone()),
        scene,
        camera,
        settings,
        toggles: RenderToggles::default(),
        renderer: None,
        last_frame: Instant::now(),
        frames_left: frames,
        last_error: None,
    };
    event_loop.run_app(&mut app).context("event loop failed")?;
    app.shutdown();

    match app.last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct AppState {
    scene: SharedScene,
    updater: UpdateThread,
    camera: Camera,
    settings: PipelineSettings,
    toggles: RenderToggles,
    renderer: Option<Renderer>,
    last_frame: Instant,
    frames_left: Option<u32>,
    last_error: Option<anyhow::Error>,
}

impl AppState {
    fn create_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title("Deferred Pipeline")
            .with_inner_size(LogicalSize::new(WINDOW_SIZE.0 as f64, WINDOW_SIZE.1 as f64));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|err| WindowInitError::from_error("window", err))?,
        );
        let renderer = block_on(Renderer::new_windowed(window, self.settings.clone()))?;
        info!("renderer ready at {:?}", renderer.extent());
        self.renderer = Some(renderer);
        Ok(())
    }

    fn redraw(&mut self) -> Result<bool> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(true);
        };
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f64();
        self.last_frame = now;
        let graph = self.scene.read();
        renderer.render(RenderContext {
            delta,
            camera: &mut self.camera,
            scene: &*graph,
            toggles: self.toggles,
        })?;
        Ok(match self.frames_left.as_mut() {
            Some(left) => {
                *left = left.saturating_sub(1);
                *left > 0
            }
            None => true,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.last_error = Some(err);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.updater.stop() {
            eprintln!("Error stopping update thread: {err:?}");
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.dispose();
        }
        self.scene.write().dispose();
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        if let Err(err) = self.create_renderer(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(renderer) = self.renderer.as_ref() else {
            return;
        };
        if renderer.window_id() != Some(window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => renderer.on_screen_resized(size.width, size.height),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let PhysicalKey::Code(code) = event.physical_key {
                    if let Some(key) = function_key(code) {
                        if self.toggles.apply_function_key(key) {
                            info!("F{key}: {:?}", self.toggles);
                        }
                    } else if code == KeyCode::Escape {
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::RedrawRequested => match self.redraw() {
                Ok(true) => {}
                Ok(false) => event_loop.exit(),
                Err(err) => self.fail(event_loop, err),
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.renderer.as_ref().and_then(Renderer::window) {
            window.request_redraw();
        }
    }
}

fn function_key(code: KeyCode) -> Option<u8> {
    Some(match code {
        KeyCode::F1 => 1,
        KeyCode::F2 => 2,
        KeyCode::F3 => 3,
        KeyCode::F4 => 4,
        KeyCode::F5 => 5,
        KeyCode::F6 => 6,
        KeyCode::F7 => 7,
        KeyCode::F8 => 8,
        _ => return None,
    })
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

const USAGE: &str = "Usage: deferred-pipeline [scene.xml] [--headless] [--frames N] \
                     [--summary-only] [--msaa N] [--ssao-samples N]";

#[derive(Debug, Default)]
struct CliOptions {
    scene: Option<PathBuf>,
    headless: bool,
    summary_only: bool,
    frames: Option<u32>,
    msaa: Option<u32>,
    ssao_samples: Option<u32>,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| -> Result<u32> {
                let text = args.next().ok_or_else(|| anyhow!("{flag} expects a value. {USAGE}"))?;
                text.parse()
                    .with_context(|| format!("invalid value for {flag}: {text}"))
            };
            match arg.as_str() {
                "--headless" => options.headless = true,
                "--summary-only" => options.summary_only = true,
                "--frames" => options.frames = Some(value("--frames")?),
                "--msaa" => options.msaa = Some(value("--msaa")?),
                "--ssao-samples" => options.ssao_samples = Some(value("--ssao-samples")?),
                "--help" | "-h" => return Err(anyhow!(USAGE)),
                other if other.starts_with("--") => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
                path if options.scene.is_none() => options.scene = Some(PathBuf::from(path)),
                extra => return Err(anyhow!("Unexpected argument: {extra}. {USAGE}")),
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse_from(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_flags_and_values() {
        let options = parse(&["scene.xml", "--headless", "--frames", "3", "--msaa", "8"]).unwrap();
        assert_eq!(options.scene, Some(PathBuf::from("scene.xml")));
        assert!(options.headless);
        assert_eq!(options.frames, Some(3));
        assert_eq!(options.msaa, Some(8));
    }

    #[test]
    fn rejects_missing_value_and_unknown_flag() {
        assert!(parse(&["--frames"]).is_err());
        assert!(parse(&["--frames", "many"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["a.xml", "b.xml"]).is_err());
    }
}
