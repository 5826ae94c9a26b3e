use tracing::warn;

use super::{BufferHandle, BufferInfo, BufferUsage, DrawCall, GpuDevice};
use crate::error::{Result, StreamError};
use crate::mesh::MeshType;

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    CreateBuffer {
        buffer: BufferHandle,
        byte_size: u64,
        usage: BufferUsage,
    },
    DestroyBuffer(BufferHandle),
    Write {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Copy {
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
    Barrier,
    BindPipeline(MeshType),
    BindVertexBuffer(BufferHandle),
    Draw(DrawCall),
    WaitFrame(u64),
}

struct HeadlessBuffer {
    debug_name: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

/// CPU-only device: buffers are byte vectors, copies land immediately and
/// every call is recorded.
#[derive(Default)]
pub struct HeadlessDevice {
    buffers: Vec<Option<HeadlessBuffer>>,
    commands: Vec<DeviceCommand>,
    memory_budget: Option<u64>,
    allocated: u64,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer creation fails once `bytes` of device memory are live.
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Default::default()
        }
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffer(buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_name(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffer(buffer).map(|b| b.debug_name.as_str())
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    fn buffer(&self, buffer: BufferHandle) -> Option<&HeadlessBuffer> {
        self.buffers.get(buffer.0 as usize).and_then(Option::as_ref)
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, info: &BufferInfo) -> Result<BufferHandle> {
        let out_of_memory = || StreamError::DeviceOutOfMemory {
            debug_name: info.debug_name.to_string(),
            byte_size: info.byte_size,
        };
        if let Some(budget) = self.memory_budget {
            if self.allocated + info.byte_size > budget {
                return Err(out_of_memory());
            }
        }
        let mut data = Vec::new();
        data.try_reserve_exact(info.byte_size as usize)
            .map_err(|_| out_of_memory())?;
        data.resize(info.byte_size as usize, 0);

        let buffer = BufferHandle(self.buffers.len() as u32);
        self.buffers.push(Some(HeadlessBuffer {
            debug_name: info.debug_name.to_string(),
            usage: info.usage,
            data,
        }));
        self.allocated += info.byte_size;
        self.commands.push(DeviceCommand::CreateBuffer {
            buffer,
            byte_size: info.byte_size,
            usage: info.usage,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        match self
            .buffers
            .get_mut(buffer.0 as usize)
            .and_then(Option::take)
        {
            Some(b) => {
                self.allocated -= b.data.len() as u64;
                self.commands.push(DeviceCommand::DestroyBuffer(buffer));
            }
            None => warn!("destroying unknown buffer {:?}", buffer),
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(Some(b)) = self.buffers.get_mut(buffer.0 as usize) else {
            warn!("write into unknown buffer {:?}", buffer);
            return;
        };
        debug_assert!(b.usage.contains(BufferUsage::HOST_VISIBLE));
        let start = offset as usize;
        b.data[start..start + data.len()].copy_from_slice(data);
        self.commands.push(DeviceCommand::Write {
            buffer,
            offset,
            size: data.len() as u64,
        });
    }

    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        let (s, d, n) = (src_offset as usize, dst_offset as usize, size as usize);
        let Some(bytes) = self.buffer(src).map(|b| {
            debug_assert!(b.usage.contains(BufferUsage::TRANSFER_SRC));
            b.data[s..s + n].to_vec()
        }) else {
            warn!("copy from unknown buffer {:?}", src);
            return;
        };
        let Some(Some(target)) = self.buffers.get_mut(dst.0 as usize) else {
            warn!("copy into unknown buffer {:?}", dst);
            return;
        };
        debug_assert!(target.usage.contains(BufferUsage::TRANSFER_DST));
        target.data[d..d + n].copy_from_slice(&bytes);
        self.commands.push(DeviceCommand::Copy {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    fn transfer_barrier(&mut self) {
        self.commands.push(DeviceCommand::Barrier);
    }

    fn bind_pipeline(&mut self, ty: MeshType) {
        self.commands.push(DeviceCommand::BindPipeline(ty));
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.commands.push(DeviceCommand::BindVertexBuffer(buffer));
    }

    fn draw(&mut self, call: &DrawCall) {
        self.commands.push(DeviceCommand::Draw(*call));
    }

    fn wait_frame(&mut self, frame_index: u64) {
        self.commands.push(DeviceCommand::WaitFrame(frame_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_land_in_destination() {
        let mut device = HeadlessDevice::new();
        let staging = device
            .create_buffer(&BufferInfo {
                debug_name: "staging",
                byte_size: 16,
                usage: BufferUsage::TRANSFER_SRC | BufferUsage::HOST_VISIBLE,
            })
            .unwrap();
        let block = device
            .create_buffer(&BufferInfo {
                debug_name: "block",
                byte_size: 32,
                usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
            })
            .unwrap();

        device.write_buffer(staging, 4, &[1, 2, 3, 4]);
        device.copy_buffer(staging, 4, block, 8, 4);
        assert_eq!(&device.buffer_data(block).unwrap()[8..12], &[1, 2, 3, 4]);
        assert_eq!(device.live_buffers(), 2);
        assert_eq!(device.allocated_bytes(), 48);

        device.destroy_buffer(staging);
        assert_eq!(device.live_buffers(), 1);
        assert!(device.buffer_data(staging).is_none());
        assert_eq!(device.buffer_name(block), Some("block"));
    }

    #[test]
    fn budget_exhaustion_is_fatal() {
        let mut device = HeadlessDevice::with_memory_budget(64);
        let info = BufferInfo {
            debug_name: "block",
            byte_size: 40,
            usage: BufferUsage::VERTEX,
        };
        device.create_buffer(&info).unwrap();
        let err = device.create_buffer(&info).unwrap_err();
        assert!(err.is_fatal());
    }
}
