//! Vertex buffers.

use crate::device::{BufferId, GpuDevice, VertexAttribute, VertexLayout};
use crate::error::{RenderError, RenderResult};

/// An interleaved `f32` vertex buffer.
///
/// The layout must be declared before data is uploaded. The vertex count is
/// always `uploaded floats / stride`. The handle is returned with
/// [`VertexBuffer::release`]; dropping a buffer without releasing it leaks the
/// device allocation and logs a warning.
#[derive(Debug)]
pub struct VertexBuffer {
    id: BufferId,
    layout: Option<VertexLayout>,
    data_len: usize,
    vertex_count: usize,
    released: bool,
}

impl VertexBuffer {
    /// Allocates an empty buffer on `device`.
    pub fn create(device: &mut dyn GpuDevice) -> RenderResult<Self> {
        let id = device.create_buffer()?;
        log::debug!("created vertex buffer {}", id.0);
        Ok(Self {
            id,
            layout: None,
            data_len: 0,
            vertex_count: 0,
            released: false,
        })
    }

    /// Creates a buffer, declares `attributes` and uploads `data`.
    ///
    /// The buffer is released again if any step fails.
    pub fn with_data(
        device: &mut dyn GpuDevice,
        attributes: &[VertexAttribute],
        data: &[f32],
    ) -> RenderResult<Self> {
        let mut buffer = Self::create(device)?;
        let filled = buffer
            .declare_layout(device, attributes)
            .and_then(|_| buffer.upload_data(device, data));
        match filled {
            Ok(()) => Ok(buffer),
            Err(e) => {
                if let Err(release_err) = buffer.release(device) {
                    log::warn!("failed to release vertex buffer after error: {release_err}");
                }
                Err(e)
            }
        }
    }

    /// Declares the interleaved layout. Last call wins.
    ///
    /// Returns the attribute slots of the previous layout that are no longer
    /// enabled. If data is already uploaded and its length is not a multiple
    /// of the new stride, nothing changes and `LayoutMismatch` is returned.
    pub fn declare_layout(
        &mut self,
        device: &mut dyn GpuDevice,
        attributes: &[VertexAttribute],
    ) -> RenderResult<Vec<u32>> {
        let layout = VertexLayout::new(attributes)?;
        if self.data_len % layout.stride() != 0 {
            return Err(RenderError::LayoutMismatch {
                len: self.data_len,
                stride: layout.stride(),
            });
        }
        device.set_vertex_layout(self.id, &layout)?;

        let stale = self
            .layout
            .as_ref()
            .map(|old| old.slots_missing_from(&layout))
            .unwrap_or_default();
        if !stale.is_empty() {
            log::warn!(
                "vertex buffer {}: layout redeclared, slots {stale:?} disabled",
                self.id.0
            );
        }

        self.vertex_count = self.data_len / layout.stride();
        self.layout = Some(layout);
        Ok(stale)
    }

    /// Replaces the buffer contents with `values`.
    ///
    /// On error the previous contents and vertex count are kept.
    pub fn upload_data(&mut self, device: &mut dyn GpuDevice, values: &[f32]) -> RenderResult<()> {
        let stride = self
            .layout
            .as_ref()
            .ok_or(RenderError::LayoutNotDeclared)?
            .stride();
        if values.len() % stride != 0 {
            return Err(RenderError::LayoutMismatch {
                len: values.len(),
                stride,
            });
        }
        device.upload_vertices(self.id, values)?;
        self.data_len = values.len();
        self.vertex_count = values.len() / stride;
        Ok(())
    }

    /// Draws all vertices as a triangle list with the bound program.
    ///
    /// An empty buffer issues no draw.
    pub fn draw(&self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        if self.layout.is_none() {
            return Err(RenderError::LayoutNotDeclared);
        }
        if self.vertex_count == 0 {
            log::debug!("vertex buffer {} is empty, draw skipped", self.id.0);
            return Ok(());
        }
        let count = u32::try_from(self.vertex_count).map_err(|_| {
            RenderError::InvalidState(format!("{} vertices exceed one draw", self.vertex_count))
        })?;
        device.draw_triangles(self.id, 0, count)
    }

    /// Returns the handle to the device.
    pub fn release(mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        self.released = true;
        log::debug!("releasing vertex buffer {}", self.id.0);
        device.delete_buffer(self.id)
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The declared layout, if any.
    pub fn layout(&self) -> Option<&VertexLayout> {
        self.layout.as_ref()
    }

    /// Floats per vertex, or 0 before a layout is declared.
    pub fn stride(&self) -> usize {
        self.layout.as_ref().map_or(0, VertexLayout::stride)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of floats last uploaded.
    pub fn data_len(&self) -> usize {
        self.data_len
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("vertex buffer {} dropped without release", self.id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ShaderStage;
    use crate::recording::{GpuCommand, RecordingDevice};
    use proptest::prelude::*;

    /// Binds a program without vertex inputs, so any layout can be drawn.
    fn bind_positionless_program(device: &mut RecordingDevice) {
        let vs = device
            .compile_shader(
                ShaderStage::Vertex,
                "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }",
            )
            .unwrap();
        let fs = device
            .compile_shader(
                ShaderStage::Fragment,
                "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }",
            )
            .unwrap();
        let (program, _) = device.link_program(vs, fs).unwrap();
        device.use_program(Some(program)).unwrap();
    }

    fn pos_uv() -> [VertexAttribute; 2] {
        [VertexAttribute::new(0, 3), VertexAttribute::new(1, 2)]
    }

    #[test]
    fn test_upload_before_layout_fails() {
        let mut device = RecordingDevice::new();
        let mut buffer = VertexBuffer::create(&mut device).unwrap();
        let err = buffer.upload_data(&mut device, &[0.0; 5]).unwrap_err();
        assert!(matches!(err, RenderError::LayoutNotDeclared));
        assert!(matches!(
            buffer.draw(&mut device),
            Err(RenderError::LayoutNotDeclared)
        ));
        buffer.release(&mut device).unwrap();
    }

    #[test]
    fn test_stride_is_sum_of_components() {
        let mut device = RecordingDevice::new();
        let mut buffer = VertexBuffer::create(&mut device).unwrap();
        buffer.declare_layout(&mut device, &pos_uv()).unwrap();
        assert_eq!(buffer.stride(), 5);
        buffer.upload_data(&mut device, &[0.0; 15]).unwrap();
        assert_eq!(buffer.vertex_count(), 3);
        buffer.release(&mut device).unwrap();
    }

    #[test]
    fn test_redeclare_reports_stale_slots() {
        let mut device = RecordingDevice::new();
        let mut buffer = VertexBuffer::create(&mut device).unwrap();
        buffer.declare_layout(&mut device, &pos_uv()).unwrap();
        buffer.upload_data(&mut device, &[0.0; 10]).unwrap();

        // 10 floats do not split into 4-float vertices.
        let err = buffer
            .declare_layout(&mut device, &[VertexAttribute::new(0, 4)])
            .unwrap_err();
        assert!(matches!(err, RenderError::LayoutMismatch { len: 10, stride: 4 }));
        assert_eq!(buffer.stride(), 5);

        // Same 5-float stride, but slot 1 is gone.
        let stale = buffer
            .declare_layout(
                &mut device,
                &[VertexAttribute::new(0, 3), VertexAttribute::new(2, 2)],
            )
            .unwrap();
        assert_eq!(stale, vec![1]);
        assert_eq!(buffer.vertex_count(), 2);
        buffer.release(&mut device).unwrap();
    }

    #[test]
    fn test_empty_buffer_draw_is_noop() {
        let mut device = RecordingDevice::new();
        let mut buffer = VertexBuffer::create(&mut device).unwrap();
        buffer.declare_layout(&mut device, &pos_uv()).unwrap();
        buffer.upload_data(&mut device, &[]).unwrap();
        buffer.draw(&mut device).unwrap();
        assert_eq!(device.draw_count(), 0);
        buffer.release(&mut device).unwrap();
    }

    #[test]
    fn test_released_handle_is_rejected() {
        let mut device = RecordingDevice::new();
        let buffer = VertexBuffer::create(&mut device).unwrap();
        let id = buffer.id();
        buffer.release(&mut device).unwrap();
        let err = device.upload_vertices(id, &[0.0; 3]).unwrap_err();
        assert!(matches!(err, RenderError::UseAfterFree { kind: "buffer", .. }));
    }

    #[test]
    fn test_with_data_releases_on_failure() {
        let mut device = RecordingDevice::new();
        let err = VertexBuffer::with_data(&mut device, &pos_uv(), &[0.0; 7]).unwrap_err();
        assert!(matches!(err, RenderError::LayoutMismatch { .. }));
        assert_eq!(device.live_resources(), 0);
    }

    proptest! {
        #[test]
        fn prop_draw_covers_exactly_uploaded_vertices(
            components in prop::collection::vec(1u32..=4, 1..4),
            vertices in 1usize..64,
        ) {
            let attributes: Vec<VertexAttribute> = components
                .iter()
                .enumerate()
                .map(|(slot, &c)| VertexAttribute::new(u32::try_from(slot).unwrap(), c))
                .collect();
            let stride: usize = components.iter().map(|&c| c as usize).sum();

            let mut device = RecordingDevice::new();
            let mut buffer = VertexBuffer::create(&mut device).unwrap();
            buffer.declare_layout(&mut device, &attributes).unwrap();
            buffer.upload_data(&mut device, &vec![0.5; vertices * stride]).unwrap();
            prop_assert_eq!(buffer.vertex_count(), vertices);

            bind_positionless_program(&mut device);
            buffer.draw(&mut device).unwrap();
            let draws: Vec<_> = device
                .commands()
                .iter()
                .filter_map(|c| match c {
                    GpuCommand::DrawTriangles { first, count, .. } => Some((*first, *count)),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(draws, vec![(0, u32::try_from(vertices).unwrap())]);
            buffer.release(&mut device).unwrap();
        }

        #[test]
        fn prop_malformed_upload_keeps_vertex_count(
            vertices in 0usize..32,
            extra in 1usize..5,
        ) {
            let mut device = RecordingDevice::new();
            let mut buffer = VertexBuffer::create(&mut device).unwrap();
            buffer.declare_layout(&mut device, &pos_uv()).unwrap();
            buffer.upload_data(&mut device, &vec![0.0; vertices * 5]).unwrap();

            let result = buffer.upload_data(&mut device, &vec![0.0; vertices * 5 + extra]);
            let is_mismatch = matches!(result, Err(RenderError::LayoutMismatch { .. }));
            prop_assert!(is_mismatch);
            prop_assert_eq!(buffer.vertex_count(), vertices);
            buffer.release(&mut device).unwrap();
        }
    }
}
