use glow::{Context, HasContext as _};

use crate::linalg::{Mat3, Mat4};
use super::geometry::SurfaceGeometry;

pub const LIGHT_DIRECTION: [f32; 3] = [-0.4, 0.6, 0.8];
pub const CLEAR_COLOR: [f32; 3] = [0.04, 0.07, 0.11];

const VERTEX_SHADER: &str = r#"
    precision highp float;
    in vec3 a_position;
    in vec3 a_normal;
    in vec3 a_color;
    uniform mat4 u_projection;
    uniform mat4 u_view;
    uniform mat4 u_model;
    uniform mat3 u_normal_matrix;
    out vec3 v_normal;
    out vec3 v_color;
    void main() {
        v_normal = normalize(u_normal_matrix * a_normal);
        v_color = a_color;
        gl_Position = u_projection * u_view * u_model * vec4(a_position, 1.0);
    }"#;

const FRAGMENT_SHADER: &str = r#"
    precision highp float;
    in vec3 v_normal;
    in vec3 v_color;
    uniform vec3 u_light_direction;
    out vec4 o_color;
    void main() {
        float diffuse = max(dot(normalize(v_normal), normalize(u_light_direction)), 0.0);
        float intensity = clamp(0.25 + diffuse, 0.0, 1.0);
        o_color = vec4(v_color * intensity, 1.0);
    }"#;

const ATTRIBUTES: [&str; 3] = ["a_position", "a_normal", "a_color"];

/// Per-frame uniform values.
#[derive(Clone, Copy, Debug)]
pub struct FrameUniforms {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
    pub normal: Mat3,
}

struct Uniforms {
    projection: Option<glow::UniformLocation>,
    view: Option<glow::UniformLocation>,
    model: Option<glow::UniformLocation>,
    normal: Option<glow::UniformLocation>,
    light_direction: Option<glow::UniformLocation>,
}

/// Shaded triangle surface: one program, one VAO, three attribute streams
/// and a `u32` index buffer.
pub struct GpuSurface {
    program: glow::Program,
    vao: glow::VertexArray,
    attribute_buffers: [glow::Buffer; 3],
    index_buffer: glow::Buffer,
    index_count: i32,
    uniforms: Uniforms,
}

unsafe impl Send for GpuSurface {}
unsafe impl Sync for GpuSurface {}

unsafe fn compile(gl: &Context, kind: u32, header: &str, source: &str) -> Result<glow::Shader, String> {
    unsafe {
        let shader = gl.create_shader(kind)?;
        gl.shader_source(shader, &format!("{header}\n{source}"));
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let info = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(format!("shader compilation failed: {info}"));
        }
        Ok(shader)
    }
}

impl GpuSurface {
    pub unsafe fn new(gl: &Context) -> Result<Self, String> {
        let version = egui_glow::ShaderVersion::get(gl);
        if !version.is_new_shader_interface() {
            return Err(format!("{version:?} lacks in/out shader interface"));
        }
        let header = version.version_declaration();

        unsafe {
            let vs = compile(gl, glow::VERTEX_SHADER, header, VERTEX_SHADER)?;
            let fs = match compile(gl, glow::FRAGMENT_SHADER, header, FRAGMENT_SHADER) {
                Ok(fs) => fs,
                Err(e) => {
                    gl.delete_shader(vs);
                    return Err(e);
                }
            };

            let program = gl.create_program()?;
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            for (location, name) in ATTRIBUTES.iter().enumerate() {
                gl.bind_attrib_location(program, location as u32, name);
            }
            gl.link_program(program);
            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            if !gl.get_program_link_status(program) {
                let info = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(format!("program link failed: {info}"));
            }

            let vao = gl.create_vertex_array()?;
            let attribute_buffers = [gl.create_buffer()?, gl.create_buffer()?, gl.create_buffer()?];
            let index_buffer = gl.create_buffer()?;

            gl.bind_vertex_array(Some(vao));
            for (location, buffer) in attribute_buffers.iter().enumerate() {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(*buffer));
                gl.enable_vertex_attrib_array(location as u32);
                gl.vertex_attrib_pointer_f32(location as u32, 3, glow::FLOAT, false, 12, 0);
            }
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(index_buffer));
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);

            let uniforms = Uniforms {
                projection: gl.get_uniform_location(program, "u_projection"),
                view: gl.get_uniform_location(program, "u_view"),
                model: gl.get_uniform_location(program, "u_model"),
                normal: gl.get_uniform_location(program, "u_normal_matrix"),
                light_direction: gl.get_uniform_location(program, "u_light_direction"),
            };

            log::info!("surface program ready ({version:?})");
            Ok(Self { program, vao, attribute_buffers, index_buffer, index_count: 0, uniforms })
        }
    }

    pub unsafe fn upload(&mut self, gl: &Context, geometry: &SurfaceGeometry) {
        let streams = [&geometry.positions, &geometry.normals, &geometry.colors];
        unsafe {
            gl.bind_vertex_array(Some(self.vao));
            for (buffer, data) in self.attribute_buffers.iter().zip(streams) {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(*buffer));
                gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(data), glow::STATIC_DRAW);
            }
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.index_buffer));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&geometry.indices),
                glow::STATIC_DRAW,
            );
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        self.index_count = geometry.indices.len() as i32;
    }

    /// Clears the current viewport and draws the surface into it.
    pub unsafe fn paint(&self, gl: &Context, frame: &FrameUniforms) {
        unsafe {
            gl.clear_color(CLEAR_COLOR[0], CLEAR_COLOR[1], CLEAR_COLOR[2], 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
            if self.index_count == 0 {
                return;
            }

            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LESS);
            gl.enable(glow::CULL_FACE);
            gl.cull_face(glow::BACK);
            gl.front_face(glow::CCW);

            gl.use_program(Some(self.program));
            let u = &self.uniforms;
            gl.uniform_matrix_4_f32_slice(u.projection.as_ref(), false, &frame.projection);
            gl.uniform_matrix_4_f32_slice(u.view.as_ref(), false, &frame.view);
            gl.uniform_matrix_4_f32_slice(u.model.as_ref(), false, &frame.model);
            gl.uniform_matrix_3_f32_slice(u.normal.as_ref(), false, &frame.normal);
            gl.uniform_3_f32_slice(u.light_direction.as_ref(), &LIGHT_DIRECTION);

            gl.bind_vertex_array(Some(self.vao));
            gl.draw_elements(glow::TRIANGLES, self.index_count, glow::UNSIGNED_INT, 0);
            gl.bind_vertex_array(None);
            gl.use_program(None);

            gl.disable(glow::CULL_FACE);
            gl.disable(glow::DEPTH_TEST);
        }
    }

    pub unsafe fn destroy(&self, gl: &Context) {
        unsafe {
            gl.delete_program(self.program);
            gl.delete_vertex_array(self.vao);
            for buffer in self.attribute_buffers {
                gl.delete_buffer(buffer);
            }
            gl.delete_buffer(self.index_buffer);
        }
    }
}
