/// Split a multi-document byte blob on `\n---\n` after normalizing CRLF line endings.
///
/// Empty input yields a single empty section; a trailing newline stays part of the last section.
pub fn split_sections(contents: &[u8]) -> Vec<Vec<u8>> {
    let mut normalized = Vec::with_capacity(contents.len());
    let mut i = 0;
    while i < contents.len() {
        if contents[i] == b'\r' && contents.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        normalized.push(contents[i]);
        i += 1;
    }

    const SEP: &[u8] = b"\n---\n";
    let mut sections = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos + SEP.len() <= normalized.len() {
        if &normalized[pos..pos + SEP.len()] == SEP {
            sections.push(normalized[start..pos].to_vec());
            pos += SEP.len();
            start = pos;
        } else {
            pos += 1;
        }
    }
    sections.push(normalized[start..].to_vec());
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_separated_sections() {
        let got = split_sections(b"section 1\r\n---\r\nsection 2");
        assert_eq!(got, vec![b"section 1".to_vec(), b"section 2".to_vec()]);
    }

    #[test]
    fn trailing_newline_is_not_a_section() {
        let got = split_sections(b"section 1\nanother line\n");
        assert_eq!(got, vec![b"section 1\nanother line\n".to_vec()]);
    }

    #[test]
    fn empty_input_is_one_empty_section() {
        assert_eq!(split_sections(b""), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn lone_carriage_returns_are_kept() {
        let got = split_sections(b"a\rb\n---\nc");
        assert_eq!(got, vec![b"a\rb".to_vec(), b"c".to_vec()]);
    }
}
