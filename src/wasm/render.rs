use wasm_bindgen::JsCast;
use web_sys::{
    HtmlCanvasElement, WebGl2RenderingContext as GL, WebGlProgram, WebGlShader, WebGlTexture,
    WebGlUniformLocation, WebGlVertexArrayObject,
};

use super::describe;
use crate::engine::RippleRenderer;
use crate::error::{RippleError, ShaderStage};
use crate::geometry::DeviceSize;
use crate::shader::{FrameUniforms, FRAGMENT_SHADER, UNIFORM_NAMES, VERTEX_SHADER};

/// WebGL2 backend: one program, one texture, one empty vertex array.
pub struct WebGlRenderer {
    gl: GL,
    program: Option<WebGlProgram>,
    vao: Option<WebGlVertexArrayObject>,
    texture: Option<WebGlTexture>,
    locations: Vec<Option<WebGlUniformLocation>>,
    size: DeviceSize,
}

impl WebGlRenderer {
    /// Acquire a WebGL2 context on `canvas` and build the ripple program.
    ///
    /// Fails with `ContextUnavailable` when the browser has no WebGL2, and with
    /// a compile/link error when the program is rejected.
    pub fn new(canvas: &HtmlCanvasElement) -> Result<Self, RippleError> {
        let options = js_sys::Object::new();
        for (key, value) in [
            ("alpha", true),
            ("antialias", false),
            ("premultipliedAlpha", true),
            ("preserveDrawingBuffer", false),
        ] {
            js_sys::Reflect::set(&options, &key.into(), &value.into())
                .map_err(|e| RippleError::Platform(describe(&e)))?;
        }

        let gl: GL = canvas
            .get_context_with_context_options("webgl2", &options)
            .map_err(|e| RippleError::ContextUnavailable(describe(&e)))?
            .ok_or_else(|| RippleError::ContextUnavailable("WebGL2 not supported".into()))?
            .dyn_into()
            .map_err(|_| RippleError::ContextUnavailable("unexpected context type".into()))?;

        let program = link_program(&gl)?;
        gl.use_program(Some(&program));
        let locations = UNIFORM_NAMES
            .iter()
            .map(|name| gl.get_uniform_location(&program, name))
            .collect();

        // gl_VertexID drives the triangle; the VAO only needs to exist.
        let vao = gl.create_vertex_array();
        gl.bind_vertex_array(vao.as_ref());

        let texture = gl
            .create_texture()
            .ok_or_else(|| RippleError::Platform("createTexture returned null".into()))?;
        gl.active_texture(GL::TEXTURE0);
        gl.bind_texture(GL::TEXTURE_2D, Some(&texture));
        gl.tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_MIN_FILTER, GL::LINEAR as i32);
        gl.tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_MAG_FILTER, GL::LINEAR as i32);
        gl.tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_WRAP_S, GL::CLAMP_TO_EDGE as i32);
        gl.tex_parameteri(GL::TEXTURE_2D, GL::TEXTURE_WRAP_T, GL::CLAMP_TO_EDGE as i32);

        // Premultiplied output: rgb scaled by alpha, alpha written as-is.
        gl.enable(GL::BLEND);
        gl.blend_func_separate(GL::SRC_ALPHA, GL::ONE_MINUS_SRC_ALPHA, GL::ONE, GL::ONE_MINUS_SRC_ALPHA);
        gl.clear_color(0.0, 0.0, 0.0, 0.0);

        let size = DeviceSize {
            width: canvas.width(),
            height: canvas.height(),
        };
        gl.viewport(0, 0, size.width as i32, size.height as i32);

        Ok(WebGlRenderer {
            gl,
            program: Some(program),
            vao,
            texture: Some(texture),
            locations,
            size,
        })
    }

    fn location(&self, index: usize) -> Option<&WebGlUniformLocation> {
        self.locations.get(index).and_then(Option::as_ref)
    }
}

impl RippleRenderer for WebGlRenderer {
    type Bitmap = HtmlCanvasElement;

    fn upload_frame_texture(&mut self, bitmap: &HtmlCanvasElement) -> Result<(), RippleError> {
        let texture = self
            .texture
            .as_ref()
            .ok_or_else(|| RippleError::TextureUpload("renderer released".into()))?;
        let gl = &self.gl;
        gl.active_texture(GL::TEXTURE0);
        gl.bind_texture(GL::TEXTURE_2D, Some(texture));
        // Row 0 of the snapshot stays row 0 of the texture (top-down, matches the vertex stage).
        gl.pixel_storei(GL::UNPACK_FLIP_Y_WEBGL, 0);
        gl.tex_image_2d_with_u32_and_u32_and_html_canvas_element(
            GL::TEXTURE_2D,
            0,
            GL::RGBA as i32,
            GL::RGBA,
            GL::UNSIGNED_BYTE,
            bitmap,
        )
        .map_err(|e| RippleError::TextureUpload(describe(&e)))?;
        log::debug!("uploaded {}x{} snapshot", bitmap.width(), bitmap.height());
        Ok(())
    }

    fn set_uniforms(&mut self, u: &FrameUniforms) {
        let gl = &self.gl;
        gl.use_program(self.program.as_ref());
        gl.viewport(0, 0, u.resolution[0] as i32, u.resolution[1] as i32);
        gl.uniform1i(self.location(0), 0);
        gl.uniform2f(self.location(1), u.resolution[0], u.resolution[1]);
        gl.uniform2f(self.location(2), u.center[0], u.center[1]);
        gl.uniform1f(self.location(3), u.elapsed);
        gl.uniform1f(self.location(4), u.duration);
        gl.uniform1f(self.location(5), u.strength);
        gl.uniform1f(self.location(6), u.speed);
        gl.uniform1f(self.location(7), u.ring_width);
    }

    fn draw_full_screen_quad(&mut self) {
        if self.program.is_none() {
            return;
        }
        let gl = &self.gl;
        gl.bind_vertex_array(self.vao.as_ref());
        gl.active_texture(GL::TEXTURE0);
        gl.bind_texture(GL::TEXTURE_2D, self.texture.as_ref());
        gl.clear(GL::COLOR_BUFFER_BIT);
        gl.draw_arrays(GL::TRIANGLES, 0, 3);
    }

    fn resize(&mut self, size: DeviceSize) {
        self.size = size;
        self.gl.viewport(0, 0, size.width as i32, size.height as i32);
    }

    fn release(&mut self) {
        let gl = &self.gl;
        gl.bind_texture(GL::TEXTURE_2D, None);
        gl.bind_vertex_array(None);
        gl.use_program(None);
        gl.delete_texture(self.texture.take().as_ref());
        gl.delete_vertex_array(self.vao.take().as_ref());
        gl.delete_program(self.program.take().as_ref());
        self.locations.clear();
        log::debug!("released GL objects ({}x{})", self.size.width, self.size.height);
    }
}

fn compile_shader(gl: &GL, stage: ShaderStage, source: &str) -> Result<WebGlShader, RippleError> {
    let kind = match stage {
        ShaderStage::Vertex => GL::VERTEX_SHADER,
        ShaderStage::Fragment => GL::FRAGMENT_SHADER,
    };
    let shader = gl.create_shader(kind).ok_or_else(|| RippleError::ShaderCompile {
        stage,
        log: "createShader returned null".into(),
    })?;
    gl.shader_source(&shader, source);
    gl.compile_shader(&shader);
    if gl
        .get_shader_parameter(&shader, GL::COMPILE_STATUS)
        .as_bool()
        .unwrap_or(false)
    {
        Ok(shader)
    } else {
        let log = gl.get_shader_info_log(&shader).unwrap_or_default();
        gl.delete_shader(Some(&shader));
        Err(RippleError::ShaderCompile { stage, log })
    }
}

fn link_program(gl: &GL) -> Result<WebGlProgram, RippleError> {
    let vert = compile_shader(gl, ShaderStage::Vertex, VERTEX_SHADER)?;
    let frag = match compile_shader(gl, ShaderStage::Fragment, FRAGMENT_SHADER) {
        Ok(frag) => frag,
        Err(err) => {
            gl.delete_shader(Some(&vert));
            return Err(err);
        }
    };
    let program = gl
        .create_program()
        .ok_or_else(|| RippleError::ProgramLink("createProgram returned null".into()))?;
    gl.attach_shader(&program, &vert);
    gl.attach_shader(&program, &frag);
    gl.link_program(&program);

    gl.detach_shader(&program, &vert);
    gl.detach_shader(&program, &frag);
    gl.delete_shader(Some(&vert));
    gl.delete_shader(Some(&frag));

    let linked = gl
        .get_program_parameter(&program, GL::LINK_STATUS)
        .as_bool()
        .unwrap_or(false);
    if linked {
        Ok(program)
    } else {
        let log = gl.get_program_info_log(&program).unwrap_or_default();
        gl.delete_program(Some(&program));
        Err(RippleError::ProgramLink(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use web_sys::CanvasRenderingContext2d;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    fn canvas(size: u32) -> HtmlCanvasElement {
        let document = web_sys::window().unwrap().document().unwrap();
        let canvas: HtmlCanvasElement = document.create_element("canvas").unwrap().dyn_into().unwrap();
        canvas.set_width(size);
        canvas.set_height(size);
        canvas
    }

    fn pixel(gl: &GL, x: i32, y: i32) -> [u8; 4] {
        let mut px = [0u8; 4];
        gl.read_pixels_with_opt_u8_array(x, y, 1, 1, GL::RGBA, GL::UNSIGNED_BYTE, Some(&mut px[..]))
            .unwrap();
        px
    }

    #[wasm_bindgen_test]
    fn snapshot_top_row_is_drawn_at_the_top() {
        // red top half, blue bottom half
        let source = canvas(4);
        let ctx: CanvasRenderingContext2d = source.get_context("2d").unwrap().unwrap().dyn_into().unwrap();
        ctx.set_fill_style_str("#ff0000");
        ctx.fill_rect(0.0, 0.0, 4.0, 2.0);
        ctx.set_fill_style_str("#0000ff");
        ctx.fill_rect(0.0, 2.0, 4.0, 2.0);

        let target = canvas(4);
        let mut renderer = match WebGlRenderer::new(&target) {
            Ok(renderer) => renderer,
            Err(RippleError::ContextUnavailable(_)) => return,
            Err(err) => panic!("{err}"),
        };
        renderer.upload_frame_texture(&source).unwrap();
        // Mid-life with no displacement: alpha is 1 and every pixel samples itself.
        renderer.set_uniforms(&FrameUniforms {
            resolution: [4.0, 4.0],
            center: [2.0, 2.0],
            elapsed: 0.55,
            duration: 1.1,
            strength: 0.0,
            speed: 1.0,
            ring_width: 1.0,
        });
        renderer.draw_full_screen_quad();

        // readPixels counts rows from the bottom.
        let top = pixel(&renderer.gl, 1, 3);
        let bottom = pixel(&renderer.gl, 1, 0);
        assert!(top[0] > 200 && top[2] < 50, "top row {top:?}");
        assert!(bottom[2] > 200 && bottom[0] < 50, "bottom row {bottom:?}");
        renderer.release();
    }
}
