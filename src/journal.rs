use std::fs;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use fault_injection::{annotate, fallible, maybe};

/// Frames larger than this are treated as garbage.
const MAX_FRAME: u64 = 1 << 32;

/// One durable change to a space.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) enum JournalRecord {
    /// The row now stored under its primary key.
    Replace(Vec<u8>),
    /// The row that was removed.
    Delete(Vec<u8>),
}

/// An append-only file of checksummed records for one space.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: fs::File,
    sync: bool,
}

fn serialize_frame(record: &JournalRecord) -> io::Result<Vec<u8>> {
    // write format:
    //  8 byte LE frame length (payload bytes)
    //  bincode encoded record
    //  LE encoded crc32 of length + payload, XOR 0xAF to make non-zero in empty case
    let payload = bincode::serialize(record)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut frame = Vec::with_capacity(payload.len() + 12);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(&payload);

    let hash: u32 = crc32fast::hash(&frame) ^ 0xAF;
    frame.extend_from_slice(&hash.to_le_bytes());
    Ok(frame)
}

/// Reads the next frame. `None` at the end of the journal, including
/// after a torn final frame.
fn read_frame<R: Read>(
    reader: &mut R,
    reusable_frame_buffer: &mut Vec<u8>,
) -> io::Result<Option<(JournalRecord, u64)>> {
    let mut frame_size_buf: [u8; 8] = [0; 8];
    match reader.read_exact(&mut frame_size_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(annotate!(e)),
    }

    let len_u64 = u64::from_le_bytes(frame_size_buf);
    if len_u64 > MAX_FRAME {
        return Err(annotate!(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("journal frame length {} is implausible", len_u64),
        )));
    }
    let len = len_u64 as usize;

    reusable_frame_buffer.clear();
    reusable_frame_buffer.resize(len + 12, 0);
    reusable_frame_buffer[..8].copy_from_slice(&frame_size_buf);

    match reader.read_exact(&mut reusable_frame_buffer[8..]) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            log::warn!("journal ends with a torn frame, ignoring it");
            return Ok(None);
        }
        Err(e) => return Err(annotate!(e)),
    }

    let crc_actual = crc32fast::hash(&reusable_frame_buffer[..len + 8]) ^ 0xAF;
    let crc_recorded = u32::from_le_bytes([
        reusable_frame_buffer[len + 8],
        reusable_frame_buffer[len + 9],
        reusable_frame_buffer[len + 10],
        reusable_frame_buffer[len + 11],
    ]);

    if crc_actual != crc_recorded {
        log::warn!("encountered incorrect crc for frame in journal");
        return Err(annotate!(io::Error::new(
            io::ErrorKind::InvalidData,
            "crc mismatch for read of journal frame",
        )));
    }

    let record = bincode::deserialize(&reusable_frame_buffer[8..len + 8])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(Some((record, len_u64 + 12)))
}

impl Journal {
    /// Opens (creating if needed) the journal at `path` and returns every
    /// intact record in it. A torn tail is cut off.
    pub(crate) fn recover(
        path: &Path,
        sync: bool,
    ) -> io::Result<(Journal, Vec<JournalRecord>)> {
        let mut options = fs::OpenOptions::new();
        options.create(true).read(true).append(true);
        let file = fallible!(options.open(path));

        let mut records = vec![];
        let mut valid_len = 0;
        let mut reader = BufReader::new(fallible!(file.try_clone()));
        let mut reusable_frame_buffer = vec![];
        while let Some((record, frame_len)) =
            read_frame(&mut reader, &mut reusable_frame_buffer)?
        {
            records.push(record);
            valid_len += frame_len;
        }

        if fallible!(file.metadata()).len() != valid_len {
            fallible!(file.set_len(valid_len));
        }

        log::trace!("recovered {} records from {:?}", records.len(), path);

        Ok((Journal { path: path.into(), file, sync }, records))
    }

    pub(crate) fn append(&mut self, record: &JournalRecord) -> io::Result<()> {
        let frame = serialize_frame(record)?;
        maybe!(self.file.write_all(&frame))?;
        if self.sync {
            maybe!(self.file.sync_all())?;
        }
        Ok(())
    }

    /// Creates the empty file that replaces this journal on truncation.
    pub(crate) fn prepare_rotation(&self) -> io::Result<PathBuf> {
        let tmp = self.path.with_extension("journal.tmp");
        let file = fallible!(fs::File::create(&tmp));
        fallible!(file.sync_all());
        Ok(tmp)
    }

    /// Moves a prepared empty file over this journal.
    pub(crate) fn rotate(&mut self, tmp: &Path) -> io::Result<()> {
        fallible!(fs::rename(tmp, &self.path));
        let mut options = fs::OpenOptions::new();
        options.read(true).append(true);
        self.file = fallible!(options.open(&self.path));
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
