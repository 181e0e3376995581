//! Runs a short immersive session against the simulated platform.
//!
//! Two controllers sweep in front of the viewer while the right grip slowly
//! closes. Pass `--wgpu` to render into an offscreen wgpu target instead of
//! the recording device; pass a path to a JSON options file to override the
//! defaults.
//!
//! ```text
//! RUST_LOG=debug cargo run --example simulated_session -- --wgpu
//! ```

use headset::{
    headless_device, init_logging, AppState, GpuDevice, Handedness, Mat4, Options,
    RecordingDevice, SimController, SimulatedSystem, Vec3, XrApp,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FRAMES: u32 = 90;

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn run(device: &mut dyn GpuDevice, options: Options) -> headset::Result<()> {
    let system = SimulatedSystem::new(WIDTH, HEIGHT);
    let platform = system.handle();
    let mut app = XrApp::new(system, options);
    if app.state() == AppState::Unsupported {
        println!("immersive sessions are not supported");
        return Ok(());
    }

    app.toggle(device)?;
    app.wait_for_assets();

    let mut rendered = 0;
    for frame in 0..FRAMES {
        let t = f64::from(frame) / 90.0;
        let sweep = (t as f32 * std::f32::consts::TAU).sin() * 0.15;
        let grip = frame as f32 / FRAMES as f32;
        platform.set_controllers(&[
            SimController::tracked(Handedness::Left, 0.0)
                .with_pose(Mat4::from_translation(Vec3::new(-0.2 + sweep, 1.3, -0.5))),
            SimController::tracked(Handedness::Right, grip)
                .with_pose(Mat4::from_translation(Vec3::new(0.2 - sweep, 1.3, -0.5))),
        ]);
        // Drop the headset pose for a few frames to show skipped frames.
        if (30..35).contains(&frame) {
            platform.set_viewer_pose(None);
        } else {
            platform.set_head(Mat4::from_translation(Vec3::new(0.0, 1.6, 0.0)));
        }
        platform.fire_frame(t * 1000.0);
        rendered += app.pump(device)?;
    }

    if let Some(stats) = app.last_stats() {
        println!(
            "rendered {rendered}/{FRAMES} frames; last frame: {} views, {} draws, {} texture binds",
            stats.views, stats.draws, stats.texture_binds
        );
    }
    app.toggle(device)?;
    Ok(())
}

fn main() -> headset::Result<()> {
    init_logging();

    let mut use_wgpu = false;
    let mut options = Options::default();
    for arg in std::env::args().skip(1) {
        if arg == "--wgpu" {
            use_wgpu = true;
        } else {
            options = Options::load(&arg)?;
        }
    }

    if use_wgpu {
        let mut device = headless_device(WIDTH, HEIGHT)?;
        run(&mut device, options)?;
        println!("wgpu device submitted {} frames", device.frame_count());
    } else {
        let mut device = RecordingDevice::new();
        run(&mut device, options)?;
        println!(
            "recording device accepted {} commands over {} frames",
            device.commands().len(),
            device.frame_count()
        );
    }
    Ok(())
}
