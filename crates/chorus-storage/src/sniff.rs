//! Content-type detection from magic bytes.
//!
//! Covers the formats the network actually stores: the audio containers we
//! accept, their 320k mp3 derivatives, and jpeg/png/gif/webp images.

pub fn sniff_content_type(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return "application/octet-stream";
    }
    if data.starts_with(b"RIFF") {
        if data.len() >= 12 && &data[8..12] == b"WAVE" {
            return "audio/wav";
        }
        if data.len() >= 12 && &data[8..12] == b"WEBP" {
            return "image/webp";
        }
    }
    if data.starts_with(b"ID3") || data.starts_with(&[0xff, 0xfb]) || data.starts_with(&[0xff, 0xf3])
    {
        return "audio/mpeg";
    }
    if data.starts_with(b"OggS") {
        return "audio/ogg";
    }
    if data.starts_with(b"fLaC") {
        return "audio/flac";
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "audio/mp4";
    }
    if data.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return "image/png";
    }
    if data.starts_with(b"GIF8") {
        return "image/gif";
    }
    "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_formats() {
        assert_eq!(sniff_content_type(b"RIFF\x00\x00\x00\x00WAVEfmt "), "audio/wav");
        assert_eq!(sniff_content_type(b"ID3\x03\x00\x00\x00rest"), "audio/mpeg");
        assert_eq!(sniff_content_type(&[0xff, 0xfb, 0x90, 0x00]), "audio/mpeg");
        assert_eq!(sniff_content_type(b"OggS\x00\x02"), "audio/ogg");
        assert_eq!(sniff_content_type(b"fLaC\x00\x00\x00\x22"), "audio/flac");
        assert_eq!(sniff_content_type(&[0xff, 0xd8, 0xff, 0xe0]), "image/jpeg");
        assert_eq!(
            sniff_content_type(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a]),
            "image/png"
        );
    }

    #[test]
    fn unknown_falls_back_to_octet_stream() {
        assert_eq!(sniff_content_type(b"????????"), "application/octet-stream");
        assert_eq!(sniff_content_type(b"ab"), "application/octet-stream");
    }
}
