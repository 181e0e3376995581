use headset_core::ViewportRect;

use super::{textures, FrameRecording, WgpuDevice};
use crate::error::{RenderError, RenderResult};

impl WgpuDevice {
    /// Clips `viewport` to the render target. `None` if nothing is left.
    fn clamp_viewport(&self, viewport: ViewportRect) -> Option<ViewportRect> {
        let x = viewport.x.min(self.width);
        let y = viewport.y.min(self.height);
        let clamped = ViewportRect::new(
            x,
            y,
            viewport.width.min(self.width - x),
            viewport.height.min(self.height - y),
        );
        (!clamped.is_empty()).then_some(clamped)
    }

    /// Encodes one frame into a single render pass and submits it.
    pub(super) fn submit_frame(&mut self, frame: FrameRecording) {
        if frame.clear.is_none() && frame.draws.is_empty() {
            return;
        }
        log::debug!(
            "submitting frame {} to framebuffer {:?}: {} draws",
            self.frames,
            frame.framebuffer,
            frame.draws.len()
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("headset frame encoder"),
            });

        let (color_load, depth_load) = match frame.clear {
            Some([r, g, b, a]) => (
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: f64::from(r),
                    g: f64::from(g),
                    b: f64::from(b),
                    a: f64::from(a),
                }),
                wgpu::LoadOp::Clear(1.0),
            ),
            None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        };

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("headset layer pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            for draw in &frame.draws {
                let Some(viewport) = self.clamp_viewport(draw.viewport) else {
                    log::debug!("draw outside the render target skipped");
                    continue;
                };
                #[allow(clippy::cast_precision_loss)]
                render_pass.set_viewport(
                    viewport.x as f32,
                    viewport.y as f32,
                    viewport.width as f32,
                    viewport.height as f32,
                    0.0,
                    1.0,
                );
                render_pass.set_pipeline(&draw.pipeline);
                for (index, group) in (0u32..).zip(&draw.bind_groups) {
                    render_pass.set_bind_group(index, group, &[]);
                }
                render_pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
                render_pass.draw(draw.vertices.clone(), 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Reads the colour target back as tightly packed RGBA8 rows, top row first.
    pub fn read_pixels(&self) -> RenderResult<Vec<u8>> {
        let bytes_per_row = textures::aligned_bytes_per_row(self.width);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layer readback buffer"),
            size: u64::from(bytes_per_row) * u64::from(self.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layer readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        rx.recv()
            .map_err(|_| RenderError::InvalidState("readback buffer mapping failed".into()))?
            .map_err(|e| RenderError::InvalidState(format!("readback buffer mapping failed: {e}")))?;

        let data = buffer_slice.get_mapped_range();
        let row_bytes = self.width as usize * 4;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * bytes_per_row as usize;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }
        drop(data);
        buffer.unmap();
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::GpuDevice;

    fn headless(width: u32, height: u32) -> Option<WgpuDevice> {
        match pollster::block_on(WgpuDevice::new_headless(width, height)) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("Skipping test: GPU not available ({e})");
                None
            }
        }
    }

    #[test]
    fn test_clamp_viewport() {
        let Some(device) = headless(64, 32) else {
            return;
        };
        assert_eq!(
            device.clamp_viewport(ViewportRect::new(32, 0, 64, 32)),
            Some(ViewportRect::new(32, 0, 32, 32))
        );
        assert_eq!(device.clamp_viewport(ViewportRect::new(64, 0, 10, 10)), None);
    }

    #[test]
    fn test_clear_reaches_target() {
        let Some(mut device) = headless(8, 8) else {
            return;
        };
        device.clear([1.0, 0.0, 0.0, 1.0]).unwrap();
        device.end_frame().unwrap();
        let pixels = device.read_pixels().unwrap();
        assert_eq!(pixels.len(), 8 * 8 * 4);
        assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);
    }
}
