//! Scene inputs read from disk: meshes, textures and the shader library.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::{RendererError, Result};
use crate::geometry::{Index, Mesh, Vertex};

/// Shader compiled into the binary.
pub const BUILTIN_SHADER: &str = include_str!("../resources/shaders/raytracing.wgsl");

/// Directory asset paths are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRoot {
    root: PathBuf,
}

impl ResourceRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `Resource` next to the directory two levels above the executable's,
    /// which is where a build tree places it relative to `target/<profile>`.
    pub fn beside_executable() -> Option<Self> {
        let exe = std::env::current_exe().ok()?;
        let base = exe.parent()?.parent()?.parent()?;
        Some(Self::new(base.join("Resource")))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }
}

/// Decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Single texel, used where a scene has no texture of its own.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }
}

/// Loads a mesh, choosing the parser by extension: `.obj` goes through
/// `tobj`, anything else is read as a plain vertex list.
pub fn load_mesh(path: &Path) -> Result<Mesh> {
    let is_obj = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("obj"));
    if is_obj {
        load_obj(path)
    } else {
        load_text_mesh(path)
    }
}

pub fn load_text_mesh(path: &Path) -> Result<Mesh> {
    let text = std::fs::read_to_string(path).map_err(|e| mesh_error(path, e))?;
    parse_text_mesh(&text).map_err(|reason| mesh_error(path, reason))
}

/// Vertex list format:
///
/// ```text
/// Vertex Count: 3
///
/// Data:
///
/// x y z  u v  nx ny nz
/// ...
/// ```
///
/// Every vertex is emitted once, so the index list is `0..count`.
pub fn parse_text_mesh(text: &str) -> std::result::Result<Mesh, String> {
    let (_, rest) = text.split_once(':').ok_or("missing vertex count")?;
    let rest = rest.trim_start();
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let count: usize = rest[..digits]
        .parse()
        .map_err(|_| "vertex count is not a number".to_owned())?;

    let (_, body) = rest[digits..]
        .split_once(':')
        .ok_or("missing vertex data")?;
    let mut chars = body.chars();
    chars.next();
    chars.next();

    let values = chars
        .as_str()
        .split_whitespace()
        .take(count * 8)
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|_| format!("`{token}` is not a number"))
        })
        .collect::<std::result::Result<Vec<f32>, String>>()?;
    if values.len() != count * 8 {
        return Err(format!(
            "expected {count} vertices, found {}",
            values.len() / 8
        ));
    }

    let vertices: Vec<Vertex> = values
        .chunks_exact(8)
        .map(|v| Vertex::new([v[0], v[1], v[2]], [v[5], v[6], v[7]], [v[3], v[4]]))
        .collect();
    let indices: Vec<Index> = (0..count as Index).collect();
    Ok(Mesh {
        vertices,
        indices,
        material: 0,
    })
}

/// Loads a triangulated single-model OBJ. Normals are renormalized; faces
/// without normals get area-weighted vertex normals.
pub fn load_obj(path: &Path) -> Result<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .map_err(|e| mesh_error(path, e))?;

    if models.len() != 1 {
        return Err(mesh_error(
            path,
            format!("expected exactly one model, found {}", models.len()),
        ));
    }
    mesh_from_obj(&models[0].mesh).map_err(|reason| mesh_error(path, reason))
}

fn mesh_from_obj(mesh: &tobj::Mesh) -> std::result::Result<Mesh, String> {
    let count = mesh.positions.len() / 3;
    if count == 0 || mesh.indices.is_empty() {
        return Err("model has no triangles".to_owned());
    }
    if let Some(bad) = mesh.indices.iter().find(|&&i| i as usize >= count) {
        return Err(format!("index {bad} out of range for {count} vertices"));
    }

    let normals = if mesh.normals.len() == count * 3 {
        mesh.normals
            .chunks_exact(3)
            .map(|n| glam::Vec3::new(n[0], n[1], n[2]))
            .collect()
    } else {
        accumulate_normals(&mesh.positions, &mesh.indices)
    };

    let vertices = (0..count)
        .map(|i| {
            let p = &mesh.positions[i * 3..i * 3 + 3];
            let uv = mesh
                .texcoords
                .get(i * 2..i * 2 + 2)
                .map_or([0.0, 0.0], |t| [t[0], t[1]]);
            let n = normals[i].try_normalize().unwrap_or(glam::Vec3::Y);
            Vertex::new([p[0], p[1], p[2]], n.to_array(), uv)
        })
        .collect();

    Ok(Mesh {
        vertices,
        indices: mesh.indices.clone(),
        material: 0,
    })
}

fn accumulate_normals(positions: &[f32], indices: &[u32]) -> Vec<glam::Vec3> {
    let at = |i: u32| {
        let i = i as usize * 3;
        glam::Vec3::new(positions[i], positions[i + 1], positions[i + 2])
    };
    let mut normals = vec![glam::Vec3::ZERO; positions.len() / 3];
    for tri in indices.chunks_exact(3) {
        let n = (at(tri[1]) - at(tri[0])).cross(at(tri[2]) - at(tri[0]));
        for &i in tri {
            normals[i as usize] += n;
        }
    }
    normals
}

/// Decodes an image file to RGBA8.
pub fn load_texture(path: &Path) -> Result<ImageData> {
    let image = image::open(path)
        .map_err(|e| RendererError::TextureLoad {
            path: path.to_owned(),
            reason: e.to_string(),
        })?
        .to_rgba8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(RendererError::TextureLoad {
            path: path.to_owned(),
            reason: "image has zero size".to_owned(),
        });
    }
    log::debug!("loaded texture {}: {width}x{height}", path.display());
    Ok(ImageData {
        width,
        height,
        pixels: image.into_raw(),
    })
}

/// Shader library source: the file when one is given, otherwise the
/// built-in one.
pub fn load_shader(path: Option<&Path>) -> Result<Cow<'static, str>> {
    match path {
        None => Ok(Cow::Borrowed(BUILTIN_SHADER)),
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(|source| RendererError::ShaderLoad {
                path: path.to_owned(),
                source,
            })?;
            log::info!("using shader {}", path.display());
            Ok(Cow::Owned(source))
        }
    }
}

fn mesh_error(path: &Path, reason: impl ToString) -> RendererError {
    RendererError::MeshLoad {
        path: path.to_owned(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TRIANGLE_TXT: &str = "Vertex Count: 3\n\nData:\n\n\
        0 0 0 0 0 0 0 -1\n\
        1 0 0 1 0 0 0 -1\n\
        0 1 0 0 1 0 0 -1\n";

    #[test]
    fn text_mesh_parses_positions_uvs_and_normals() {
        let mesh = parse_text_mesh(TRIANGLE_TXT).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        let v = mesh.vertices[1];
        assert_eq!(v.position, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(v.uv, [1.0, 0.0]);
        assert_eq!(v.normal, [0.0, 0.0, -1.0]);
    }

    #[test]
    fn text_mesh_skips_the_opening_brace() {
        let text = "VertexCount: 1\nVertexList (pos, tex, normal):\n{\n1 2 3 0.5 0.25 0 1 0\n}\n";
        let mesh = parse_text_mesh(text).unwrap();
        assert_eq!(mesh.vertices[0].position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn truncated_text_mesh_is_an_error() {
        let text = "Vertex Count: 2\n\nData:\n\n0 0 0 0 0 0 0 1\n";
        let err = parse_text_mesh(text).unwrap_err();
        assert!(err.contains("expected 2 vertices"), "{err}");
        assert!(parse_text_mesh("no header here").is_err());
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn obj_quad_is_triangulated_with_unit_normals() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "quad.obj",
            "o quad\n\
             v 0 0 0\nv 2 0 0\nv 2 2 0\nv 0 2 0\n\
             vn 0 0 -3\n\
             f 1//1 2//1 3//1 4//1\n",
        );
        let mesh = load_mesh(&path).unwrap();
        assert_eq!(mesh.indices.len(), 6);
        for v in &mesh.vertices {
            assert_eq!(v.normal, [0.0, 0.0, -1.0]);
        }
    }

    #[test]
    fn obj_without_normals_gets_face_normals() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "tri.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        let mesh = load_obj(&path).unwrap();
        for v in &mesh.vertices {
            assert!((v.normal[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn obj_with_two_models_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "two.obj",
            "o a\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n\
             o b\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 4 5 6\n",
        );
        let err = load_obj(&path).unwrap_err();
        assert!(matches!(err, RendererError::MeshLoad { .. }));
        assert!(err.to_string().contains("exactly one model"));
    }

    #[test]
    fn missing_files_report_their_path() {
        let err = load_mesh(Path::new("does/not/exist.obj")).unwrap_err();
        assert!(err.to_string().contains("exist.obj"));
        let err = load_texture(Path::new("does/not/exist.png")).unwrap_err();
        assert!(matches!(err, RendererError::TextureLoad { .. }));
        let err = load_shader(Some(Path::new("does/not/exist.wgsl"))).unwrap_err();
        assert!(matches!(err, RendererError::ShaderLoad { .. }));
    }

    #[test]
    fn png_decodes_to_rgba8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();
        let img = load_texture(&path).unwrap();
        assert_eq!((img.width, img.height), (3, 2));
        assert_eq!(&img.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn builtin_shader_is_used_without_a_path() {
        assert!(load_shader(None).unwrap().starts_with("enable wgpu_ray_query;"));
    }

    #[test]
    fn resource_root_joins_relative_paths() {
        let root = ResourceRoot::new("/assets");
        assert_eq!(root.resolve("models/floor.obj"), PathBuf::from("/assets/models/floor.obj"));
    }
}
