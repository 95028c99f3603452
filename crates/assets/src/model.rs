//! glTF model import.

use beachscape_common::Rgb;
use beachscape_scene::{MeshData, Model, ModelPrimitive, TextureImage};
use glam::Mat4;
use std::path::Path;

use crate::AssetError;

/// Import every triangle primitive reachable from the file's default scene.
///
/// Each mesh node yields one primitive per mesh primitive, so a mesh shared
/// by several nodes is imported once per node and meshes no node references
/// are skipped. The node's own transform is left for the diorama placement to
/// replace; its ancestors' transforms are kept as the primitive's parent.
/// Missing normals are computed from faces, missing UVs default to zero, and
/// non-indexed primitives get a trivial index list.
pub fn load_model(path: &Path) -> Result<Model, AssetError> {
    let _span = tracing::info_span!("load_model", path = %path.display()).entered();

    let (document, buffers, images) =
        gltf::import(path).map_err(|source| match source {
            gltf::Error::Io(io) => AssetError::Io(io),
            source => AssetError::GltfParse {
                path: path.to_path_buf(),
                source,
            },
        })?;

    let mut primitives = Vec::new();
    if let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) {
        let import = Import {
            buffers: &buffers,
            images: &images,
        };
        for node in scene.nodes() {
            import.visit(&node, Mat4::IDENTITY, &mut primitives)?;
        }
    }

    if primitives.is_empty() {
        return Err(AssetError::NoMeshes {
            path: path.to_path_buf(),
        });
    }

    let model = Model {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        primitives,
    };
    tracing::info!(
        primitives = model.primitives.len(),
        vertices = model.vertex_count(),
        triangles = model.triangle_count(),
        "model imported"
    );
    Ok(model)
}

/// Buffer and image data shared by every node of one import.
struct Import<'a> {
    buffers: &'a [gltf::buffer::Data],
    images: &'a [gltf::image::Data],
}

impl Import<'_> {
    /// Collect the primitives of `node` and its descendants. `parent` is the
    /// accumulated transform of the node's ancestors.
    fn visit(
        &self,
        node: &gltf::Node<'_>,
        parent: Mat4,
        out: &mut Vec<ModelPrimitive>,
    ) -> Result<(), AssetError> {
        let local = Mat4::from_cols_array_2d(&node.transform().matrix());

        if let Some(mesh) = node.mesh() {
            let node_name = node
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("node_{}", node.index()));
            let mesh_name = mesh
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("mesh_{}", mesh.index()));

            // A single-primitive node is itself the drawable and takes the
            // placement. A multi-primitive node stays a group holding its
            // transform, and its primitives take the placement below it.
            let primitive_parent = if mesh.primitives().len() > 1 {
                parent * local
            } else {
                parent
            };

            for primitive in mesh.primitives() {
                if primitive.mode() != gltf::mesh::Mode::Triangles {
                    tracing::warn!(mesh = %mesh_name, mode = ?primitive.mode(), "skipping non-triangle primitive");
                    continue;
                }
                let name = format!("{node_name}/{mesh_name}#{}", primitive.index());
                if let Some(mut imported) = self.read_primitive(&primitive, name)? {
                    imported.parent = primitive_parent;
                    out.push(imported);
                }
            }
        }

        for child in node.children() {
            self.visit(&child, parent * local, out)?;
        }
        Ok(())
    }

    fn read_primitive(
        &self,
        primitive: &gltf::Primitive<'_>,
        name: String,
    ) -> Result<Option<ModelPrimitive>, AssetError> {
        let reader = primitive.reader(|buffer| Some(&self.buffers[buffer.index()]));

        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| AssetError::MissingAttribute {
                mesh: name.clone(),
                attribute: "POSITION",
            })?
            .collect();

        let uvs: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|iter| iter.into_f32().collect())
            .unwrap_or_else(|| vec![[0.0, 0.0]; positions.len()]);

        let indices: Vec<u32> = reader
            .read_indices()
            .map(|iter| iter.into_u32().collect())
            .unwrap_or_else(|| (0..positions.len() as u32).collect());

        let normals = reader.read_normals().map(|iter| iter.collect::<Vec<_>>());
        let has_normals = normals.is_some();

        let mut mesh_data = MeshData {
            normals: normals.unwrap_or_default(),
            positions,
            uvs,
            indices,
        };
        if !has_normals {
            mesh_data.compute_normals();
        }
        if !mesh_data.is_valid() {
            tracing::warn!(mesh = %name, "skipping primitive with inconsistent attributes");
            return Ok(None);
        }

        let pbr = primitive.material().pbr_metallic_roughness();
        let [r, g, b, _] = pbr.base_color_factor();
        let base_color = match pbr.base_color_texture() {
            Some(info) => {
                let source = info.texture().source().index();
                match self.images.get(source).map(convert_image).transpose() {
                    Ok(image) => image,
                    Err(e) => {
                        tracing::warn!(mesh = %name, "base color texture dropped: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Some(ModelPrimitive {
            name,
            mesh: mesh_data,
            color: Rgb::new(r, g, b),
            base_color,
            parent: Mat4::IDENTITY,
        }))
    }
}

/// Expand 8-bit glTF image data to RGBA8.
fn convert_image(data: &gltf::image::Data) -> Result<TextureImage, AssetError> {
    use gltf::image::Format;

    let pixels: Vec<u8> = match data.format {
        Format::R8G8B8A8 => data.pixels.clone(),
        Format::R8G8B8 => data
            .pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        Format::R8G8 => data
            .pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        Format::R8 => data.pixels.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        other => return Err(AssetError::UnsupportedPixelFormat(format!("{other:?}"))),
    };

    let image = TextureImage {
        width: data.width,
        height: data.height,
        pixels,
    };
    if !image.is_consistent() {
        return Err(AssetError::InvalidImage(format!(
            "{}x{} glTF image with {} bytes",
            image.width,
            image.height,
            image.byte_len()
        )));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write `tri.bin` (one triangle, positions only) and a glTF document
    /// around it. `layout` supplies the scene, node and mesh arrays.
    fn write_gltf(dir: &Path, file: &str, layout: &str) -> std::path::PathBuf {
        let mut bytes = Vec::new();
        for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            for c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        std::fs::write(dir.join("tri.bin"), &bytes).unwrap();

        let json = format!(
            r#"{{
            "asset": {{ "version": "2.0" }},
            {layout},
            "buffers": [{{ "uri": "tri.bin", "byteLength": 36 }}],
            "bufferViews": [{{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }}],
            "accessors": [{{
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
            }}]
        }}"#
        );
        let path = dir.join(file);
        std::fs::write(&path, json).unwrap();
        path
    }

    fn write_triangle_gltf(dir: &Path) -> std::path::PathBuf {
        write_gltf(
            dir,
            "tri.gltf",
            r#""scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{ "name": "tri", "primitives": [{ "attributes": { "POSITION": 0 } }] }]"#,
        )
    }

    #[test]
    fn imports_minimal_triangle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_triangle_gltf(dir.path());

        let model = load_model(&path).unwrap();
        assert_eq!(model.name, "tri");
        assert_eq!(model.primitives.len(), 1);

        let prim = &model.primitives[0];
        assert_eq!(prim.name, "node_0/tri#0");
        assert_eq!(prim.parent, Mat4::IDENTITY);
        assert_eq!(prim.mesh.indices, vec![0, 1, 2]);
        assert_eq!(prim.mesh.uvs, vec![[0.0, 0.0]; 3]);
        // Normals were computed from the face.
        assert_eq!(prim.mesh.normals[0], [0.0, 0.0, 1.0]);
        assert_eq!(prim.color, Rgb::WHITE);
        assert!(prim.base_color.is_none());
    }

    #[test]
    fn instanced_mesh_keeps_parent_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gltf(
            dir.path(),
            "instanced.gltf",
            r#""scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [
                { "name": "root", "rotation": [0.0, 0.0, 0.70710677, 0.70710677], "children": [1, 2] },
                { "name": "left", "mesh": 0 },
                { "name": "right", "mesh": 0, "translation": [5.0, 0.0, 0.0] }
            ],
            "meshes": [
                { "name": "tri", "primitives": [{ "attributes": { "POSITION": 0 } }] },
                { "name": "orphan", "primitives": [{ "attributes": { "POSITION": 0 } }] }
            ]"#,
        );

        let model = load_model(&path).unwrap();
        let names: Vec<&str> = model.primitives.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["left/tri#0", "right/tri#0"]);

        let quarter_turn = Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2);
        for prim in &model.primitives {
            // Only the ancestors remain; the node's own offset is dropped.
            assert!(prim.parent.abs_diff_eq(quarter_turn, 1e-5), "{}", prim.name);
            assert_eq!(prim.mesh.positions[1], [1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn multi_primitive_node_keeps_its_own_transform() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gltf(
            dir.path(),
            "group.gltf",
            r#""scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0, "translation": [0.0, 2.0, 0.0] }],
            "meshes": [{ "name": "pair", "primitives": [
                { "attributes": { "POSITION": 0 } },
                { "attributes": { "POSITION": 0 } }
            ] }]"#,
        );

        let model = load_model(&path).unwrap();
        assert_eq!(model.primitives.len(), 2);
        let lift = Mat4::from_translation(glam::Vec3::new(0.0, 2.0, 0.0));
        for prim in &model.primitives {
            assert!(prim.parent.abs_diff_eq(lift, 1e-6));
        }
    }

    #[test]
    fn missing_model_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_model(&dir.path().join("scene.gltf")).unwrap_err();
        assert!(matches!(err, AssetError::Io(_)));
    }

    #[test]
    fn model_without_meshes_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.gltf");
        std::fs::write(&path, r#"{ "asset": { "version": "2.0" } }"#).unwrap();
        let err = load_model(&path).unwrap_err();
        assert!(matches!(err, AssetError::NoMeshes { .. }));
    }

    #[test]
    fn rgb_image_expands_to_rgba() {
        let data = gltf::image::Data {
            pixels: vec![1, 2, 3, 4, 5, 6],
            format: gltf::image::Format::R8G8B8,
            width: 2,
            height: 1,
        };
        let tex = convert_image(&data).unwrap();
        assert_eq!(tex.pixels, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn sixteen_bit_images_are_unsupported() {
        let data = gltf::image::Data {
            pixels: vec![0; 8],
            format: gltf::image::Format::R16G16B16A16,
            width: 1,
            height: 1,
        };
        assert!(matches!(
            convert_image(&data),
            Err(AssetError::UnsupportedPixelFormat(_))
        ));
    }
}
