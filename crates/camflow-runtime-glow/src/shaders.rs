//! Built-in shader sources, addressed by logical name.

use camflow_core::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderDialect {
    /// Desktop GL 3.3 core.
    Glsl330,
    /// GLES 3.0 (external OES samplers available).
    Essl300,
}

impl ShaderDialect {
    fn header(self) -> &'static str {
        match self {
            ShaderDialect::Glsl330 => "#version 330 core\n",
            ShaderDialect::Essl300 => "#version 300 es\nprecision mediump float;\n",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub vert: String,
    pub frag: String,
    /// Logical name, used in logs.
    pub origin: String,
}

/// Samples the camera stream texture.
pub const OES: &str = "oes";
/// Samples an ordinary 2D texture.
pub const TEXTURE: &str = "texture";

const QUAD_VERT_BODY: &str = r#"layout (location = 0) in vec2 a_Position;
layout (location = 1) in vec2 a_TexCoord;
uniform mat4 u_Matrix;
uniform mat4 u_TexMatrix;
out vec2 v_TexCoord;
void main() {
    gl_Position = u_Matrix * vec4(a_Position, 0.0, 1.0);
    v_TexCoord = (u_TexMatrix * vec4(a_TexCoord, 0.0, 1.0)).xy;
}
"#;

const TEXTURE_FRAG_BODY: &str = r#"in vec2 v_TexCoord;
out vec4 o;
uniform sampler2D s_Texture;
void main() { o = texture(s_Texture, v_TexCoord); }
"#;

const OES_FRAG_ESSL: &str = r#"#version 300 es
#extension GL_OES_EGL_image_external_essl3 : require
precision mediump float;
in vec2 v_TexCoord;
out vec4 o;
uniform samplerExternalOES s_Texture;
void main() { o = texture(s_Texture, v_TexCoord); }
"#;

pub fn source(name: &str, dialect: ShaderDialect) -> Result<ShaderSource, EngineError> {
    let vert = format!("{}{}", dialect.header(), QUAD_VERT_BODY);
    let frag = match (name, dialect) {
        (OES, ShaderDialect::Essl300) => OES_FRAG_ESSL.to_string(),
        // Desktop hosts back the stream with a plain 2D texture.
        (OES, ShaderDialect::Glsl330) | (TEXTURE, _) => {
            format!("{}{}", dialect.header(), TEXTURE_FRAG_BODY)
        }
        _ => return Err(EngineError::ShaderNotFound(name.to_string())),
    };
    Ok(ShaderSource {
        vert,
        frag,
        origin: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oes_uses_external_sampler_only_on_gles() {
        let es = source(OES, ShaderDialect::Essl300).unwrap();
        assert!(es.frag.contains("samplerExternalOES"));
        assert!(es.vert.starts_with("#version 300 es"));

        let desktop = source(OES, ShaderDialect::Glsl330).unwrap();
        assert!(desktop.frag.contains("sampler2D"));
        assert!(desktop.frag.starts_with("#version 330 core"));
    }

    #[test]
    fn unknown_name_is_reported() {
        let err = source("sepia", ShaderDialect::Glsl330).expect_err("not built in");
        assert!(matches!(err, EngineError::ShaderNotFound(ref n) if n == "sepia"));
    }
}
