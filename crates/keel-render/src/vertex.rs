//! Vertex formats for the built-in pipelines.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use keel_gpu::{VertexAttribute, VertexLayout, VertexLayoutDesc};
use std::mem::{offset_of, size_of};

/// Index element used by the built-in meshes.
pub type MeshIndex = u32;

/// Position and color, used by the test pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimpleVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl SimpleVertex {
    pub const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }
}

impl VertexLayout for SimpleVertex {
    fn layout() -> VertexLayoutDesc {
        VertexLayoutDesc::new(
            size_of::<Self>() as u32,
            vec![
                VertexAttribute::new(
                    0,
                    offset_of!(Self, position) as u32,
                    vk::Format::R32G32B32_SFLOAT,
                ),
                VertexAttribute::new(1, offset_of!(Self, color) as u32, vk::Format::R32G32B32_SFLOAT),
            ],
        )
    }
}

/// Position, normal and color, used by the terrain pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl VertexLayout for TerrainVertex {
    fn layout() -> VertexLayoutDesc {
        VertexLayoutDesc::new(
            size_of::<Self>() as u32,
            vec![
                VertexAttribute::new(
                    0,
                    offset_of!(Self, position) as u32,
                    vk::Format::R32G32B32_SFLOAT,
                ),
                VertexAttribute::new(1, offset_of!(Self, normal) as u32, vk::Format::R32G32B32_SFLOAT),
                VertexAttribute::new(2, offset_of!(Self, color) as u32, vk::Format::R32G32B32_SFLOAT),
            ],
        )
    }
}

/// No vertex input; the shader generates positions from the vertex index.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyVertex;

impl VertexLayout for EmptyVertex {
    fn layout() -> VertexLayoutDesc {
        VertexLayoutDesc::empty()
    }
}

/// The quad drawn by `draw_test`.
pub const TEST_QUAD_VERTICES: [SimpleVertex; 4] = [
    SimpleVertex::new([-0.5, -0.5, 63.0], [1.0, 0.0, -0.1]),
    SimpleVertex::new([0.5, -0.5, 63.0], [0.0, 1.0, -0.1]),
    SimpleVertex::new([0.5, 0.5, 63.0], [0.0, 0.0, 0.9]),
    SimpleVertex::new([-0.5, 0.5, 63.0], [1.0, 1.0, 0.9]),
];

pub const TEST_QUAD_INDICES: [MeshIndex; 6] = [0, 1, 2, 2, 3, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_layout() {
        let layout = SimpleVertex::layout();
        assert_eq!(layout.stride, 24);
        assert_eq!(
            layout.attributes,
            vec![
                VertexAttribute::new(0, 0, vk::Format::R32G32B32_SFLOAT),
                VertexAttribute::new(1, 12, vk::Format::R32G32B32_SFLOAT),
            ]
        );
    }

    #[test]
    fn terrain_layout() {
        let layout = TerrainVertex::layout();
        assert_eq!(layout.stride, 36);
        let offsets: Vec<_> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let locations: Vec<_> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }

    #[test]
    fn empty_layout() {
        let layout = EmptyVertex::layout();
        assert!(layout.binding().is_none());
    }

    #[test]
    fn test_quad_indices_in_range() {
        assert!(TEST_QUAD_INDICES
            .iter()
            .all(|&i| (i as usize) < TEST_QUAD_VERTICES.len()));
    }
}
