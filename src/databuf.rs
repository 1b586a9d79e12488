//! Word-granular access to the controller's shared packet RAM.
//!
//! The RAM is only addressable 32 bits at a time; byte-oriented reads and
//! writes have to assemble/disassemble the tail word by hand, mirroring
//! `usb_data_write`/`usb_data_read` from the original firmware.

/// Write `src` into the word array `data` starting at byte offset
/// `dst_offset`, zero-padding the tail of the final word.
pub(crate) fn write_words(data: *mut u32, data_words: usize, dst_offset: usize, src: &[u8]) {
    debug_assert!(dst_offset % 4 == 0, "packet RAM writes must be word-aligned");
    let base = dst_offset / 4;
    let mut chunks = src.chunks_exact(4);
    for (i, chunk) in chunks.by_ref().enumerate() {
        let word = u32::from_le_bytes(chunk.try_into().unwrap());
        write_one(data, data_words, base + i, word);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut buf = [0u8; 4];
        buf[..rem.len()].copy_from_slice(rem);
        let word = u32::from_le_bytes(buf);
        write_one(data, data_words, base + src.len() / 4, word);
    }
}

/// Read `len` bytes out of the word array `data` starting at byte offset
/// `src_offset` into `dst`.
pub(crate) fn read_words(data: *const u32, data_words: usize, dst: &mut [u8], src_offset: usize, len: usize) {
    debug_assert!(src_offset % 4 == 0, "packet RAM reads must be word-aligned");
    debug_assert!(dst.len() >= len);
    let base = src_offset / 4;
    let full_words = len / 4;
    for i in 0..full_words {
        let word = read_one(data, data_words, base + i);
        dst[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    let tail = len & 3;
    if tail != 0 {
        let word = read_one(data, data_words, base + full_words);
        let bytes = word.to_le_bytes();
        dst[full_words * 4..full_words * 4 + tail].copy_from_slice(&bytes[..tail]);
    }
}

fn write_one(data: *mut u32, data_words: usize, word_idx: usize, value: u32) {
    assert!(word_idx < data_words, "packet RAM write out of bounds");
    unsafe { core::ptr::write_volatile(data.add(word_idx), value) };
}

fn read_one(data: *const u32, data_words: usize, word_idx: usize) -> u32 {
    assert!(word_idx < data_words, "packet RAM read out of bounds");
    unsafe { core::ptr::read_volatile(data.add(word_idx)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip_exact_words() {
        let mut ram = [0u32; 4];
        write_words(ram.as_mut_ptr(), 4, 0, b"abcdefgh");
        let mut out = [0u8; 8];
        read_words(ram.as_ptr(), 4, &mut out, 0, 8);
        assert_eq!(&out, b"abcdefgh");
    }

    #[test]
    fn write_then_read_roundtrip_partial_tail() {
        let mut ram = [0u32; 4];
        write_words(ram.as_mut_ptr(), 4, 0, b"abcde");
        let mut out = [0u8; 5];
        read_words(ram.as_ptr(), 4, &mut out, 0, 5);
        assert_eq!(&out, b"abcde");
        // the zero-padded tail bytes of the written word must not leak
        // garbage when re-read at full word length.
        let mut full = [0u8; 8];
        read_words(ram.as_ptr(), 4, &mut full, 0, 8);
        assert_eq!(&full[5..], &[0, 0, 0]);
    }

    #[test]
    fn offset_write_lands_on_requested_word() {
        let mut ram = [0xffff_ffffu32; 4];
        write_words(ram.as_mut_ptr(), 4, 4, b"xy");
        assert_eq!(ram[0], 0xffff_ffff);
        assert_eq!(ram[1].to_le_bytes()[0..2], *b"xy");
    }
}
