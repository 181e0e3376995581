//! Triangle meshes in the `[x, y, z, u, v]` layout used by every drawable.

use std::io::BufReader;
use std::path::Path;

use crate::device::VertexAttribute;
use crate::error::{RenderError, RenderResult};

/// Position at slot 0, texture coordinate at slot 1.
pub const MESH_ATTRIBUTES: [VertexAttribute; 2] =
    [VertexAttribute::new(0, 3), VertexAttribute::new(1, 2)];

/// Floats per mesh vertex.
pub const MESH_STRIDE: usize = 5;

/// Parses Wavefront OBJ text into a flat triangle list.
///
/// Faces are triangulated and indices expanded, so the result can be drawn
/// without an index buffer. Vertices without texture coordinates get `(0, 0)`.
/// Material libraries are ignored.
pub fn parse_obj(text: &str) -> RenderResult<Vec<f32>> {
    let mut reader = BufReader::new(text.as_bytes());
    let (models, _materials) = tobj::load_obj_buf(&mut reader, &tobj::GPU_LOAD_OPTIONS, |_| {
        Err(tobj::LoadError::GenericFailure)
    })
    .map_err(|e| RenderError::Mesh(e.to_string()))?;

    let mut vertices = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        let has_uv = mesh.texcoords.len() * 3 == mesh.positions.len() * 2;
        for &index in &mesh.indices {
            let i = index as usize;
            let position = mesh
                .positions
                .get(3 * i..3 * i + 3)
                .ok_or_else(|| RenderError::Mesh(format!("index {i} out of range")))?;
            vertices.extend_from_slice(position);
            if has_uv {
                vertices.extend_from_slice(&mesh.texcoords[2 * i..2 * i + 2]);
            } else {
                vertices.extend_from_slice(&[0.0, 0.0]);
            }
        }
    }
    if vertices.is_empty() {
        return Err(RenderError::Mesh("OBJ contains no triangles".into()));
    }
    Ok(vertices)
}

/// Reads and parses an OBJ file.
pub fn load_obj(path: impl AsRef<Path>) -> RenderResult<Vec<f32>> {
    let text = std::fs::read_to_string(path)?;
    parse_obj(&text)
}

/// Axis-aligned box centred on the origin, as a triangle list.
///
/// Each face maps the full `[0, 1]` texture square.
pub fn box_mesh(half_extents: [f32; 3]) -> Vec<f32> {
    let [x, y, z] = half_extents;
    // Corners of each face, counter-clockwise seen from outside.
    let faces: [[[f32; 3]; 4]; 6] = [
        [[-x, -y, z], [x, -y, z], [x, y, z], [-x, y, z]],
        [[x, -y, -z], [-x, -y, -z], [-x, y, -z], [x, y, -z]],
        [[x, -y, z], [x, -y, -z], [x, y, -z], [x, y, z]],
        [[-x, -y, -z], [-x, -y, z], [-x, y, z], [-x, y, -z]],
        [[-x, y, z], [x, y, z], [x, y, -z], [-x, y, -z]],
        [[-x, -y, -z], [x, -y, -z], [x, -y, z], [-x, -y, z]],
    ];
    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    let mut data = Vec::with_capacity(6 * 6 * MESH_STRIDE);
    for face in &faces {
        for corner in [0, 1, 2, 0, 2, 3] {
            data.extend_from_slice(&face[corner]);
            data.extend_from_slice(&uvs[corner]);
        }
    }
    data
}

/// Placeholder for the open hand: a flat slab.
pub fn placeholder_open_hand() -> Vec<f32> {
    box_mesh([1.6, 0.4, 2.4])
}

/// Placeholder for the closed hand: a compact block.
pub fn placeholder_closed_hand() -> Vec<f32> {
    box_mesh([1.2, 1.0, 1.2])
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3 4/4
";

    #[test]
    fn test_parse_quad_triangulates() {
        let data = parse_obj(QUAD).unwrap();
        assert_eq!(data.len(), 6 * MESH_STRIDE);
        // Second vertex of the first triangle.
        assert_eq!(&data[5..10], &[1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_parse_without_texcoords() {
        let data = parse_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(data.len(), 3 * MESH_STRIDE);
        assert_eq!(&data[3..5], &[0.0, 0.0]);
    }

    #[test]
    fn test_parse_ignores_material_library() {
        let text = format!("mtllib hand.mtl\n{QUAD}");
        assert!(parse_obj(&text).is_ok());
    }

    #[test]
    fn test_empty_obj_is_error() {
        assert!(matches!(parse_obj("# nothing"), Err(RenderError::Mesh(_))));
    }

    #[test]
    fn test_box_mesh_vertex_count() {
        let data = box_mesh([1.0, 1.0, 1.0]);
        assert_eq!(data.len() % MESH_STRIDE, 0);
        assert_eq!(data.len() / MESH_STRIDE, 36);
        assert!(data
            .chunks(MESH_STRIDE)
            .all(|v| v[0].abs() == 1.0 && v[1].abs() == 1.0 && v[2].abs() == 1.0));
    }

    #[test]
    fn test_placeholders_differ() {
        assert_ne!(placeholder_open_hand(), placeholder_closed_hand());
    }
}
