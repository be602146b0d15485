use glam::Vec3;

use crate::camera::Camera;
use crate::error::Result;
use crate::geometry::{InstanceConstants, Material, Mesh};
use crate::loader::{self, ImageData, ResourceRoot};

/// Per-frame constant block, `SceneConstants` in the shader (144 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneConstants {
    pub view: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub light_pos: [f32; 4],
    pub light_ambient: [f32; 4],
    pub light_diffuse: [f32; 4],
    pub viewport_scale: [f32; 2],
    pub _pad: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
}

/// Camera and light, owned by the frame dispatcher and turned into
/// [`SceneConstants`] every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneState {
    pub camera: Camera,
    pub light: Light,
}

impl SceneState {
    pub fn constants(&self, width: u32, height: u32) -> SceneConstants {
        let eye = self.camera.eye;
        SceneConstants {
            view: self.camera.view_rotation().to_cols_array_2d(),
            camera_pos: [eye.x, eye.y, eye.z, 1.0],
            light_pos: self.light.position.extend(1.0).to_array(),
            light_ambient: self.light.ambient,
            light_diffuse: self.light.diffuse,
            viewport_scale: self.camera.viewport_scale(width, height),
            _pad: [0.0; 2],
        }
    }
}

/// A mesh file and how it is shaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSource {
    pub path: &'static str,
    pub material: u32,
    pub color: [f32; 4],
}

/// Fixed scene description; paths are relative to the resource root.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub meshes: Vec<MeshSource>,
    pub materials: Vec<Material>,
    pub albedo_texture: &'static str,
    pub normal_map: &'static str,
    pub camera: Camera,
    pub light_ambient: [f32; 4],
    pub light_diffuse: [f32; 4],
    /// The point light sits at this mesh's centroid.
    pub light_mesh: usize,
}

pub const RED: u32 = 0;
pub const GREEN: u32 = 1;
pub const WHITE: u32 = 2;
pub const LIGHT: u32 = 3;

impl SceneConfig {
    pub fn cornell_box() -> Self {
        // area light spectrum folded down to rgb
        let emission = [
            8.0 * (0.747 + 0.058) + 15.6 * (0.740 + 0.287) + 18.4 * (0.737 + 0.642),
            8.0 * (0.747 + 0.258) + 15.6 * (0.740 + 0.160) + 18.4 * (0.737 + 0.159),
            8.0 * 0.747 + 15.6 * 0.740 + 18.4 * 0.737,
        ];

        let mesh = |path, material, color| MeshSource {
            path,
            material,
            color,
        };

        Self {
            meshes: vec![
                mesh("models/floor.obj", WHITE, [0.63, 0.065, 0.05, 1.0]),
                mesh("models/shortbox.obj", WHITE, [0.63, 0.45, 0.05, 1.0]),
                mesh("models/tallbox.obj", WHITE, [0.63, 0.065, 0.65, 1.0]),
                mesh("models/left.obj", RED, [0.14, 0.45, 0.091, 1.0]),
                mesh("models/right.obj", GREEN, [0.725, 0.71, 0.68, 1.0]),
                mesh("models/light.obj", LIGHT, [0.65, 0.65, 0.65, 1.0]),
            ],
            materials: vec![
                Material::diffuse([0.63, 0.065, 0.05]),
                Material::diffuse([0.14, 0.45, 0.091]),
                Material::diffuse([0.725, 0.71, 0.68]),
                Material::diffuse([0.65, 0.65, 0.65]).emissive(emission, 1.0),
            ],
            albedo_texture: "texture/Earth4kTexture_4K.png",
            normal_map: "texture/Earth4kNormal_4K.png",
            camera: Camera::look_at(Vec3::new(278.0, 273.0, -800.0), Vec3::ZERO, Vec3::Y, 40.0),
            light_ambient: [0.25, 0.25, 0.25, 1.0],
            light_diffuse: [1.0, 1.0, 1.0, 1.0],
            light_mesh: 5,
        }
    }

    /// Reads every mesh and texture. Nothing touches the GPU, so a missing
    /// asset fails before any device object for the scene exists.
    pub fn load(&self, root: &ResourceRoot) -> Result<SceneInput> {
        let meshes = self
            .meshes
            .iter()
            .map(|src| {
                let mesh = loader::load_mesh(&root.resolve(src.path))?;
                log::debug!("{}: {} vertices", src.path, mesh.vertices.len());
                Ok(mesh.with_material(src.material).with_color(src.color))
            })
            .collect::<Result<Vec<Mesh>>>()?;

        let albedo = loader::load_texture(&root.resolve(self.albedo_texture))?;
        let normal_map = loader::load_texture(&root.resolve(self.normal_map))?;

        let light_position = meshes
            .get(self.light_mesh)
            .map_or(Vec3::ZERO, |m| Vec3::from_array(m.centroid()));

        log::info!(
            "scene: {} meshes, {} materials, light at {light_position}",
            meshes.len(),
            self.materials.len()
        );
        Ok(SceneInput {
            instance_constants: vec![InstanceConstants::WHITE; meshes.len()],
            meshes,
            materials: self.materials.clone(),
            albedo,
            normal_map,
            state: SceneState {
                camera: self.camera,
                light: Light {
                    position: light_position,
                    ambient: self.light_ambient,
                    diffuse: self.light_diffuse,
                },
            },
        })
    }
}

/// Everything the backend uploads at start-up.
#[derive(Debug, Clone)]
pub struct SceneInput {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    /// Hit-record payload, one per mesh.
    pub instance_constants: Vec<InstanceConstants>,
    pub albedo: ImageData,
    pub normal_map: ImageData,
    pub state: SceneState,
}

impl SceneInput {
    /// One white triangle three units in front of a camera at the origin,
    /// lit from the eye. Needs no files.
    pub fn single_triangle() -> Self {
        Self {
            meshes: vec![Mesh::triangle(3.0)],
            materials: vec![Material::diffuse([0.725, 0.71, 0.68])],
            instance_constants: vec![InstanceConstants::WHITE],
            albedo: ImageData::solid([255, 255, 255, 255]),
            // flat tangent-space normal
            normal_map: ImageData::solid([128, 128, 255, 255]),
            state: SceneState {
                camera: Camera::look_at(Vec3::ZERO, Vec3::Z, Vec3::Y, 40.0),
                light: Light {
                    position: Vec3::ZERO,
                    ambient: [0.25, 0.25, 0.25, 1.0],
                    diffuse: [1.0, 1.0, 1.0, 1.0],
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_constants_match_shader_layout() {
        assert_eq!(std::mem::size_of::<SceneConstants>(), 144);
        assert_eq!(std::mem::offset_of!(SceneConstants, camera_pos), 64);
        assert_eq!(std::mem::offset_of!(SceneConstants, light_diffuse), 112);
        assert_eq!(std::mem::offset_of!(SceneConstants, viewport_scale), 128);
    }

    #[test]
    fn constants_carry_camera_and_light() {
        let state = SceneInput::single_triangle().state;
        let c = state.constants(200, 100);
        assert_eq!(c.camera_pos, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(c.light_pos[3], 1.0);
        assert_eq!(c.light_ambient, [0.25, 0.25, 0.25, 1.0]);
        assert!((c.viewport_scale[0] - 2.0 * c.viewport_scale[1]).abs() < 1e-6);
        assert_eq!(c.view, glam::Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn cornell_box_references_valid_materials() {
        let cfg = SceneConfig::cornell_box();
        assert_eq!(cfg.meshes.len(), 6);
        let materials: Vec<u32> = cfg.meshes.iter().map(|m| m.material).collect();
        assert_eq!(materials, vec![2, 2, 2, 0, 1, 3]);
        assert!(cfg.meshes.iter().all(|m| (m.material as usize) < cfg.materials.len()));
        assert_eq!(cfg.meshes[cfg.light_mesh].material, LIGHT);

        let light = cfg.materials[LIGHT as usize];
        assert!((light.emission[0] - 47.8348).abs() < 1e-3);
        assert_eq!(light.emission[3], 1.0);
        assert!(cfg.materials[..3].iter().all(|m| m.emission == [0.0; 4]));
    }

    #[test]
    fn missing_assets_fail_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let err = SceneConfig::cornell_box()
            .load(&ResourceRoot::new(dir.path()))
            .unwrap_err();
        assert!(err.to_string().contains("floor.obj"));
    }

    #[test]
    fn light_sits_at_the_light_mesh_centroid() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        let cfg = SceneConfig::cornell_box();
        for (i, src) in cfg.meshes.iter().enumerate() {
            let y = i as f32;
            let obj = format!("v 0 {y} 0\nv 2 {y} 0\nv 0 {y} 2\nvn 0 1 0\nf 1//1 2//1 3//1\n");
            std::fs::write(dir.path().join(src.path), obj).unwrap();
        }
        let textures = dir.path().join("texture");
        std::fs::create_dir_all(&textures).unwrap();
        for name in [cfg.albedo_texture, cfg.normal_map] {
            image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 255, 255, 255]))
                .save(dir.path().join(name))
                .unwrap();
        }

        let input = cfg.load(&ResourceRoot::new(dir.path())).unwrap();
        assert_eq!(input.meshes.len(), 6);
        assert_eq!(input.instance_constants.len(), 6);
        assert_eq!(input.meshes[3].material, RED);
        assert_eq!(input.meshes[0].vertices[0].color, [0.63, 0.065, 0.05, 1.0]);
        let p = input.state.light.position;
        assert!((p - Vec3::new(2.0 / 3.0, 5.0, 2.0 / 3.0)).length() < 1e-5);
    }
}
