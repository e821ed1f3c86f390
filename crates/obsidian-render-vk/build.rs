use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Compute: integrate particles from the previous-state buffer into the
    // output buffer. Must match `Particle` (std430, 32 bytes) and the
    // descriptor layout: binding 0 = read, binding 1 = write.
    // local_size_x must equal WORKGROUP_SIZE on the Rust side.
    let comp_src = r#"
#version 450
layout(local_size_x = 256) in;

struct Particle {
    vec2 position;
    vec2 velocity;
    vec4 color;
};

layout(std430, set = 0, binding = 0) readonly buffer ParticlesIn { Particle pin[]; };
layout(std430, set = 0, binding = 1) buffer ParticlesOut { Particle pout[]; };

layout(push_constant) uniform Step { float dt; } step;

void main() {
    uint i = gl_GlobalInvocationID.x;
    Particle p = pin[i];
    p.position += p.velocity * step.dt;

    // Bounce off the clip-space edges.
    if (abs(p.position.x) > 1.0) {
        p.velocity.x = -p.velocity.x;
        p.position.x = clamp(p.position.x, -1.0, 1.0);
    }
    if (abs(p.position.y) > 1.0) {
        p.velocity.y = -p.velocity.y;
        p.position.y = clamp(p.position.y, -1.0, 1.0);
    }
    pout[i] = p;
}
"#;

    // Vertex: binding 0 with location 0 = vec2 position (offset 0),
    // location 1 = vec4 color (offset 16), stride 32.
    let vs_src = r#"
#version 450
layout(location = 0) in vec2 inPosition;
layout(location = 1) in vec4 inColor;

layout(location = 0) out vec4 vColor;

void main() {
    gl_PointSize = 1.0;
    gl_Position = vec4(inPosition, 0.0, 1.0);
    vColor = inColor;
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vColor;
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_1 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        (comp_src, shaderc::ShaderKind::Compute, "particle.comp"),
        (vs_src, shaderc::ShaderKind::Vertex, "particle.vert"),
        (fs_src, shaderc::ShaderKind::Fragment, "particle.frag"),
    ];
    for (src, kind, name) in shaders {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
