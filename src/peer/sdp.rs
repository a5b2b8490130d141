//! Opus `a=fmtp` line tuning applied to outgoing offers/answers.

const OPUS_SUFFIX: &str = ";maxaveragebitrate=60000;stereo=0;useinbandfec=1";

/// Appends the fixed Opus tuning suffix to every `a=fmtp:<pt> ...` line in
/// an SDP body. Idempotent in the sense that it only touches `a=fmtp`
/// lines, but calling it twice on the same SDP appends the suffix twice —
/// callers apply it exactly once per offer/answer.
pub fn configure_opus_sdp(sdp: &str) -> String {
    sdp.lines()
        .map(|line| {
            if line.starts_with("a=fmtp:") {
                format!("{line}{OPUS_SUFFIX}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_suffix_to_fmtp_lines() {
        let sdp = "v=0\r\na=fmtp:111 minptime=10;useinbandfec=1\r\na=rtpmap:111 opus/48000/2";
        let tuned = configure_opus_sdp(sdp);
        assert!(tuned.contains("maxaveragebitrate=60000"));
        assert!(tuned.contains("stereo=0"));
        assert!(tuned.contains("useinbandfec=1"));
    }

    #[test]
    fn leaves_non_fmtp_lines_untouched() {
        let sdp = "v=0\r\na=rtpmap:111 opus/48000/2";
        let tuned = configure_opus_sdp(sdp);
        assert!(tuned.contains("a=rtpmap:111 opus/48000/2"));
        assert!(!tuned.contains("maxaveragebitrate"));
    }

    #[test]
    fn applying_twice_differs_from_once() {
        let sdp = "a=fmtp:111 minptime=10";
        let once = configure_opus_sdp(sdp);
        let twice = configure_opus_sdp(&once);
        assert_ne!(once, twice);
        assert!(twice.contains("maxaveragebitrate=60000"));
    }

    #[test]
    fn handles_multiple_fmtp_lines() {
        let sdp = "a=fmtp:111 minptime=10\r\na=fmtp:112 minptime=20";
        let tuned = configure_opus_sdp(sdp);
        assert_eq!(tuned.matches("maxaveragebitrate=60000").count(), 2);
    }
}
