//! WGSL compile and link checks shared by every device.
//!
//! Compilation runs the naga front end and validator on each stage. Linking
//! checks the program interface both devices rely on:
//! - the vertex stage reads `f32` positions (scalar or vector) from
//!   `@location(0)`
//! - the fragment stage reads its color from a `vec4<f32>` uniform at
//!   `@group(0) @binding(0)`
//! - no other resource bindings are declared

use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::{GraphicsError, GraphicsResult, ShaderStage};

/// Entry points of a successfully linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LinkedProgram {
    pub(super) vertex_entry: String,
    pub(super) fragment_entry: String,
}

pub(super) fn compile(stage: ShaderStage, source: &str) -> GraphicsResult<naga::Module> {
    if source.trim().is_empty() {
        return Err(GraphicsError::ShaderCompile {
            stage,
            log: "empty source".to_string(),
        });
    }

    let module = naga::front::wgsl::parse_str(source).map_err(|e| GraphicsError::ShaderCompile {
        stage,
        log: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| GraphicsError::ShaderCompile {
            stage,
            log: e.emit_to_string(source),
        })?;

    Ok(module)
}

pub(super) fn link(vertex: &naga::Module, fragment: &naga::Module) -> GraphicsResult<LinkedProgram> {
    let vs = vertex
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Vertex)
        .ok_or_else(|| link_error("vertex source has no @vertex entry point"))?;

    let position = vs.function.arguments.iter().find_map(|arg| match &arg.binding {
        Some(binding) if is_location_0(binding) => Some(arg.ty),
        Some(_) => None,
        None => match &vertex.types[arg.ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .find(|m| m.binding.as_ref().is_some_and(is_location_0))
                .map(|m| m.ty),
            _ => None,
        },
    });
    let Some(position) = position else {
        return Err(link_error(format!(
            "vertex entry point `{}` has no input at @location(0)",
            vs.name
        )));
    };
    if !is_f32_based(&vertex.types[position].inner) {
        return Err(link_error(format!(
            "vertex entry point `{}` must read f32 positions at @location(0)",
            vs.name
        )));
    }

    let fs = fragment
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Fragment)
        .ok_or_else(|| link_error("fragment source has no @fragment entry point"))?;

    check_bindings(vertex, ShaderStage::Vertex)?;
    check_bindings(fragment, ShaderStage::Fragment)?;

    let has_color = fragment.global_variables.iter().any(|(_, var)| {
        var.space == naga::AddressSpace::Uniform
            && var.binding == Some(COLOR_BINDING)
            && is_vec4_f32(&fragment.types[var.ty].inner)
    });
    if !has_color {
        return Err(link_error(
            "fragment source has no vec4<f32> uniform at @group(0) @binding(0)",
        ));
    }

    Ok(LinkedProgram {
        vertex_entry: vs.name.clone(),
        fragment_entry: fs.name.clone(),
    })
}

const COLOR_BINDING: naga::ResourceBinding = naga::ResourceBinding {
    group: 0,
    binding: 0,
};

fn check_bindings(module: &naga::Module, stage: ShaderStage) -> GraphicsResult<()> {
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else { continue };
        let is_color = *binding == COLOR_BINDING
            && var.space == naga::AddressSpace::Uniform
            && is_vec4_f32(&module.types[var.ty].inner);
        if !is_color {
            return Err(link_error(format!(
                "{stage} source declares unsupported binding @group({}) @binding({})",
                binding.group, binding.binding
            )));
        }
    }
    Ok(())
}

fn is_location_0(binding: &naga::Binding) -> bool {
    matches!(binding, naga::Binding::Location { location: 0, .. })
}

/// `f32` or `vecN<f32>`, the only position formats vertex data is uploaded as.
fn is_f32_based(inner: &naga::TypeInner) -> bool {
    matches!(
        inner,
        naga::TypeInner::Scalar(naga::Scalar::F32)
            | naga::TypeInner::Vector {
                scalar: naga::Scalar::F32,
                ..
            }
    )
}

fn is_vec4_f32(inner: &naga::TypeInner) -> bool {
    matches!(
        inner,
        naga::TypeInner::Vector {
            size: naga::VectorSize::Quad,
            scalar: naga::Scalar::F32,
        }
    )
}

fn link_error(msg: impl Into<String>) -> GraphicsError {
    GraphicsError::ProgramLink(msg.into())
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;

    pub(crate) const VERTEX: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
"#;

    pub(crate) const FRAGMENT: &str = r#"
@group(0) @binding(0) var<uniform> color: vec4<f32>;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return color;
}
"#;

    fn program(vertex: &str, fragment: &str) -> GraphicsResult<LinkedProgram> {
        let vs = compile(ShaderStage::Vertex, vertex)?;
        let fs = compile(ShaderStage::Fragment, fragment)?;
        link(&vs, &fs)
    }

    #[test]
    fn links_basic_program() {
        let linked = program(VERTEX, FRAGMENT).unwrap();
        assert_eq!(linked.vertex_entry, "vs_main");
        assert_eq!(linked.fragment_entry, "fs_main");
    }

    #[test]
    fn syntax_error_is_a_compile_error() {
        let err = compile(ShaderStage::Vertex, "fn broken( {").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompile { stage: ShaderStage::Vertex, .. }));
    }

    #[test]
    fn empty_source_is_a_compile_error() {
        let err = compile(ShaderStage::Fragment, "  \n").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompile { stage: ShaderStage::Fragment, .. }));
    }

    #[test]
    fn stages_swapped_fail_to_link() {
        let err = program(FRAGMENT, VERTEX).unwrap_err();
        assert!(matches!(err, GraphicsError::ProgramLink(_)));
    }

    #[test]
    fn missing_color_uniform_fails_to_link() {
        let fragment = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;
        let err = program(VERTEX, fragment).unwrap_err();
        assert!(matches!(err, GraphicsError::ProgramLink(_)));
    }

    #[test]
    fn extra_binding_fails_to_link() {
        let fragment = r#"
@group(0) @binding(0) var<uniform> color: vec4<f32>;
@group(0) @binding(1) var<uniform> scale: f32;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return color * scale;
}
"#;
        let err = program(VERTEX, fragment).unwrap_err();
        assert!(matches!(err, GraphicsError::ProgramLink(_)));
    }

    #[test]
    fn integer_positions_fail_to_link() {
        let vertex = r#"
@vertex
fn vs_main(@location(0) position: vec2<u32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(vec2<f32>(position), 0.0, 1.0);
}
"#;
        let err = program(vertex, FRAGMENT).unwrap_err();
        assert!(matches!(err, GraphicsError::ProgramLink(_)));
    }

    #[test]
    fn integer_positions_in_struct_fail_to_link() {
        let vertex = r#"
struct VertexIn {
    @location(0) position: vec3<i32>,
}

@vertex
fn vs_main(input: VertexIn) -> @builtin(position) vec4<f32> {
    return vec4<f32>(vec3<f32>(input.position), 1.0);
}
"#;
        let err = program(vertex, FRAGMENT).unwrap_err();
        assert!(matches!(err, GraphicsError::ProgramLink(_)));
    }

    #[test]
    fn scalar_position_links() {
        let vertex = r#"
@vertex
fn vs_main(@location(0) x: f32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(x, 0.0, 0.0, 1.0);
}
"#;
        assert!(program(vertex, FRAGMENT).is_ok());
    }

    #[test]
    fn struct_input_at_location_0_links() {
        let vertex = r#"
struct VertexIn {
    @location(0) position: vec2<f32>,
}

@vertex
fn main(input: VertexIn) -> @builtin(position) vec4<f32> {
    return vec4<f32>(input.position, 0.0, 1.0);
}
"#;
        let linked = program(vertex, FRAGMENT).unwrap();
        assert_eq!(linked.vertex_entry, "main");
    }
}
