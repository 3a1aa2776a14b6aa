//! Queue metadata and record verification (`qam_vrfy_meta` /
//! `qam_vrfy_data`): cross-checks the geometry fields stored in a
//! queue's meta page and flags records whose on-disk layout can't be
//! trusted.

use crate::common::{Error, Result};

/// The subset of the queue meta page the verifier cross-checks.
/// `first_recno` is the oldest live record number, `cur_recno` one
/// past the newest; `re_len` is the fixed record length and `rec_page`
/// how many of them fit per page alongside `page_ext` (pages per
/// extent) and the extent span actually present on disk.
#[derive(Debug, Clone, Copy)]
pub struct QueueMeta {
    pub first_recno: u32,
    pub cur_recno: u32,
    pub re_len: u32,
    pub rec_page: u32,
    pub page_ext: u32,
    pub page_size: u32,
    pub first_extent: u32,
    pub last_extent: u32,
}

/// Valid bits for a queue record's leading flag byte: `QAM_VALID`
/// marks a live record, `QAM_SET` that it has ever been written.
pub const QAM_VALID: u8 = 0b01;
pub const QAM_SET: u8 = 0b10;
const QAM_KNOWN_FLAGS: u8 = QAM_VALID | QAM_SET;

/// One verifier finding. Structural errors (tree-corrupting) and
/// advisory ones share this struct; the caller decides severity by
/// category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyFinding {
    pub category: &'static str,
    pub detail: String,
}

impl VerifyFinding {
    fn new(category: &'static str, detail: impl Into<String>) -> Self {
        Self { category, detail: detail.into() }
    }
}

/// `qam_vrfy_meta`: checks the meta page's own fields are internally
/// consistent, independent of anything on disk.
pub fn verify_meta(meta: &QueueMeta) -> Vec<VerifyFinding> {
    let mut findings = Vec::new();

    if meta.re_len == 0 {
        findings.push(VerifyFinding::new("meta", "re_len is zero"));
    }
    if meta.rec_page == 0 {
        findings.push(VerifyFinding::new("meta", "rec_page is zero"));
    }
    if meta.page_ext == 0 {
        findings.push(VerifyFinding::new("meta", "page_ext is zero"));
    }
    if meta.first_extent > meta.last_extent && meta.last_extent != 0 {
        findings.push(VerifyFinding::new(
            "meta",
            format!("first_extent {} exceeds last_extent {}", meta.first_extent, meta.last_extent),
        ));
    }

    // Record-size-fits-in-page: rec_page header-sized records must fit
    // within one page including the per-record flag byte.
    let required = meta.rec_page.saturating_mul(meta.re_len + 1);
    if meta.rec_page > 0 && required > meta.page_size {
        findings.push(VerifyFinding::new(
            "meta",
            format!(
                "{} records of length {} (plus flag byte) do not fit in a {}-byte page",
                meta.rec_page, meta.re_len, meta.page_size
            ),
        ));
    }

    // first_recno/cur_recno: the queue is a ring over the recno space,
    // so cur_recno == first_recno only means "empty", never "invalid".
    if meta.first_recno == 0 {
        findings.push(VerifyFinding::new("meta", "first_recno is zero (recno space is 1-based)"));
    }
    if meta.cur_recno == 0 {
        findings.push(VerifyFinding::new("meta", "cur_recno is zero (recno space is 1-based)"));
    }

    findings
}

/// `qam_vrfy_data` per-page pass: flags extents on disk that fall
/// outside `[first_extent, last_extent]` (orphans left behind by a
/// crash between unlink and meta-page update).
pub fn verify_orphan_extents(meta: &QueueMeta, extents_on_disk: &[u32]) -> Vec<VerifyFinding> {
    extents_on_disk
        .iter()
        .filter(|&&e| e < meta.first_extent || e > meta.last_extent)
        .map(|&e| VerifyFinding::new("orphan-extent", format!("extent {e} lies outside [{}, {}]", meta.first_extent, meta.last_extent)))
        .collect()
}

/// `qam_vrfy_data` per-record pass: a record's flag byte must only
/// carry bits this access method ever sets.
pub fn verify_record_flags(pgno: u32, slot: usize, flags: u8) -> Option<VerifyFinding> {
    if flags & !QAM_KNOWN_FLAGS != 0 {
        Some(VerifyFinding::new(
            "record-flags",
            format!("page {pgno} slot {slot} has unrecognized flag bits {:#04b}", flags & !QAM_KNOWN_FLAGS),
        ))
    } else {
        None
    }
}

/// Runs every check and returns a `Result` so a caller that wants
/// fail-fast "is this usable" semantics doesn't have to inspect the
/// finding list themselves.
pub fn verify_all(meta: &QueueMeta, extents_on_disk: &[u32]) -> Result<Vec<VerifyFinding>> {
    if meta.page_size == 0 {
        return Err(Error::InvalidArg("queue meta page_size is zero".into()));
    }
    let mut findings = verify_meta(meta);
    findings.extend(verify_orphan_extents(meta, extents_on_disk));
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_meta() -> QueueMeta {
        QueueMeta {
            first_recno: 1,
            cur_recno: 5,
            re_len: 32,
            rec_page: 100,
            page_ext: 4,
            page_size: 4096,
            first_extent: 0,
            last_extent: 2,
        }
    }

    #[test]
    fn test_clean_meta_has_no_findings() {
        assert!(verify_meta(&good_meta()).is_empty());
    }

    #[test]
    fn test_zero_re_len_is_flagged() {
        let mut meta = good_meta();
        meta.re_len = 0;
        let findings = verify_meta(&meta);
        assert!(findings.iter().any(|f| f.detail.contains("re_len")));
    }

    #[test]
    fn test_oversized_rec_page_is_flagged() {
        let mut meta = good_meta();
        meta.rec_page = 1000; // 1000 * 33 bytes > 4096
        let findings = verify_meta(&meta);
        assert!(findings.iter().any(|f| f.category == "meta" && f.detail.contains("do not fit")));
    }

    #[test]
    fn test_orphan_extent_detected() {
        let meta = good_meta();
        let findings = verify_orphan_extents(&meta, &[0, 1, 2, 5]);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].detail.contains("extent 5"));
    }

    #[test]
    fn test_unknown_record_flag_bits_rejected() {
        assert!(verify_record_flags(3, 0, QAM_VALID).is_none());
        assert!(verify_record_flags(3, 0, QAM_VALID | QAM_SET).is_none());
        assert!(verify_record_flags(3, 0, 0b1000_0000).is_some());
    }

    #[test]
    fn test_verify_all_rejects_zero_page_size() {
        let mut meta = good_meta();
        meta.page_size = 0;
        assert!(verify_all(&meta, &[]).is_err());
    }
}
