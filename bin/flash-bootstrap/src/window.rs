use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use crate::{
    bootsector::{PartitionEntry, SECTOR_SIZE},
    errors::ImageError,
};

#[derive(Debug)]
pub struct DiskImage<D> {
    inner: D,
    len: u64,
}

impl DiskImage<File> {
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { inner: file, len })
    }

    pub(crate) fn close(self) -> Result<(), ImageError> {
        self.inner.sync_all()?;
        Ok(())
    }
}

impl<D: Read + Write + Seek> DiskImage<D> {
    #[cfg(test)]
    pub(crate) fn new(mut inner: D) -> Result<Self, ImageError> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> D {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    pub fn partition_window(&mut self, partition: &PartitionEntry) -> PartitionWindow<'_, D> {
        PartitionWindow::new(&mut self.inner, partition.start_offset(), partition.byte_len())
    }
}

/// The byte range `[base, base + size)` of a disk image. Offsets given to `read_at` and `write_at` are relative to
/// `base`, and any access not fully inside the range is rejected before touching the image.
#[derive(Debug)]
pub struct PartitionWindow<'a, D> {
    disk: &'a mut D,
    base: u64,
    size: u64,
}

impl<'a, D: Read + Write + Seek> PartitionWindow<'a, D> {
    pub fn new(disk: &'a mut D, base: u64, size: u64) -> Self {
        Self { disk, base, size }
    }

    fn in_bounds(&self, offset: u64, len: usize) -> bool {
        match offset.checked_add(len as u64) {
            Some(end) => end <= self.size,
            None => false,
        }
    }

    pub(crate) fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ImageError> {
        if !self.in_bounds(offset, buf.len()) {
            return Err(ImageError::OutOfRange { offset, len: buf.len(), size: self.size });
        }

        self.disk.seek(SeekFrom::Start(self.base + offset))?;
        self.disk.read_exact(buf)?;
        Ok(buf.len())
    }

    pub(crate) fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize, ImageError> {
        if !self.in_bounds(offset, buf.len()) {
            return Err(ImageError::Overflow { offset, len: buf.len(), size: self.size });
        }

        self.disk.seek(SeekFrom::Start(self.base + offset))?;
        self.disk.write_all(buf)?;
        Ok(buf.len())
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    #[allow(dead_code)]
    pub(crate) fn close(&self) -> Result<(), ImageError> {
        Err(ImageError::CloseUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootsector::{test_image, BootSector, ROOT_PARTITION_INDEX};
    use std::io::Cursor;

    fn disk() -> Cursor<Vec<u8>> {
        Cursor::new((0..8192u32).map(|i| (i % 251) as u8).collect())
    }

    #[test]
    fn out_of_range_read_leaves_buffer_untouched() {
        let mut d = disk();
        let mut w = PartitionWindow::new(&mut d, 1024, 2048);
        let mut buf = [0xaau8; 16];

        assert!(matches!(
            w.read_at(&mut buf, 2040),
            Err(ImageError::OutOfRange { offset: 2040, len: 16, size: 2048 })
        ));
        assert!(matches!(w.read_at(&mut buf, u64::MAX - 4), Err(ImageError::OutOfRange { .. })));
        assert_eq!(buf, [0xaau8; 16]);

        // Ends exactly on the boundary.
        assert_eq!(w.read_at(&mut buf, 2032).unwrap(), 16);
        assert_eq!(buf[0], ((1024 + 2032) % 251) as u8);
    }

    #[test]
    fn overflowing_write_leaves_disk_untouched() {
        let mut d = disk();
        let before = d.get_ref().clone();
        {
            let mut w = PartitionWindow::new(&mut d, 1024, 2048);
            assert!(matches!(w.write_at(&[1u8; 512], 1537), Err(ImageError::Overflow { .. })));
            assert!(matches!(w.write_at(&[1u8; 1], 2048), Err(ImageError::Overflow { .. })));
        }
        assert_eq!(d.get_ref(), &before);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut d = disk();
        let mut w = PartitionWindow::new(&mut d, 512, 4096);
        let payload = b"hello partition";

        assert_eq!(w.write_at(payload, 700).unwrap(), payload.len());
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(w.read_at(&mut buf, 700).unwrap(), payload.len());
        assert_eq!(&buf, payload);
        assert_eq!(&d.get_ref()[1212..1212 + payload.len()], payload);
    }

    #[test]
    fn reports_geometry_and_refuses_close() {
        let mut d = disk();
        let w = PartitionWindow::new(&mut d, 0, 4096);
        assert_eq!(w.len(), 4096);
        assert_eq!(w.sector_size(), 512);
        assert!(matches!(w.close(), Err(ImageError::CloseUnsupported)));
    }

    #[test]
    fn window_from_partition_entry() {
        let mut image = DiskImage::new(Cursor::new(test_image(64 * 512, &[(0x0c, 8, 8), (0x83, 16, 32)]))).unwrap();
        assert_eq!(image.len(), 64 * 512);

        let bs = BootSector::from_disk_image(image.inner_mut()).unwrap();
        bs.validate(image.len()).unwrap();
        let root = bs.partition(ROOT_PARTITION_INDEX).unwrap();

        let mut w = image.partition_window(root);
        assert_eq!(w.len(), 32 * 512);
        w.write_at(b"root", 0).unwrap();
        assert!(w.write_at(b"x", 32 * 512).is_err());

        let data = image.into_inner().into_inner();
        assert_eq!(&data[16 * 512..16 * 512 + 4], b"root");
    }
}
