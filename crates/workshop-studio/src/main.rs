use anyhow::Result;
use winit::dpi::LogicalSize;

use workshop_engine::coords::Color;
use workshop_engine::device::{GraphicsError, GraphicsResult, Topology};
use workshop_engine::logging::{init_logging, LoggingConfig};
use workshop_engine::shaders::BUILTIN_BASIC;
use workshop_engine::view::{Frame, ViewConfig};
use workshop_engine::window::{Runtime, RuntimeConfig};

/// Radians per second.
const SPIN_RATE: f32 = 0.8;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = RuntimeConfig {
        title: "workshop studio".to_string(),
        initial_size: LogicalSize::new(640.0, 640.0),
        view: ViewConfig {
            clear_color: Color::from_rgba8(18, 20, 28, 255),
            ..ViewConfig::default()
        },
        ..RuntimeConfig::default()
    };

    log::info!("opening {}", config.title);
    Runtime::run(config, draw_triangle)
}

fn draw_triangle(frame: &mut Frame<'_>) -> GraphicsResult<()> {
    let t = frame.time.elapsed;
    let size = frame.size();
    let Some(shader) = frame.shader(BUILTIN_BASIC) else {
        return Err(GraphicsError::ShaderNotLoaded);
    };

    // Keep the triangle round on non-square windows.
    let aspect = size.height as f32 / size.width.max(1) as f32;
    let radius = 0.6 + 0.1 * (t * 2.0).sin();

    let mut positions = Vec::with_capacity(6);
    for corner in 0..3 {
        let angle = t * SPIN_RATE + corner as f32 * std::f32::consts::TAU / 3.0;
        positions.push(angle.cos() * radius * aspect.min(1.0));
        positions.push(angle.sin() * radius * (1.0 / aspect).min(1.0));
    }

    let pulse = 0.5 + 0.5 * (t * 1.3).sin();
    shader.use_program()?;
    shader.set_color(Color::new(0.95, 0.45 + 0.3 * pulse, 0.2, 1.0))?;
    shader.set_vertex_positions_pointer(&positions, 2, 0)?;
    shader.draw_arrays(Topology::Triangles, 0, 3)
}
