//! Entry and file name classification shared by the inspectors and the
//! candidate selection.

/// Extensions of playable video containers
pub(crate) const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "wmv", "mpg", "mpeg", "ts", "m2ts", "mts", "webm", "flv",
    "vob", "ogm", "divx", "3gp",
];

/// Extensions that mark an archive, including split volumes
const ARCHIVE_EXTENSIONS: &[&str] = &["rar", "zip", "7z", "tar", "gz", "bz2", "xz", "tgz"];

/// Optical disc image extensions
const DISC_IMAGE_EXTENSIONS: &[&str] = &["iso", "img", "bin", "nrg", "mdf"];

/// Lower-cased extension of the last path component, without the dot
pub(crate) fn extension(name: &str) -> Option<String> {
    let base = base_name(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Last component of a `/` or `\` separated path
pub(crate) fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Whether `name` is a playable video file
pub(crate) fn is_video(name: &str) -> bool {
    extension(name).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether `name` is an optical disc image
pub(crate) fn is_disc_image(name: &str) -> bool {
    extension(name).is_some_and(|ext| DISC_IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether `name` is an archive or an archive volume (`.r00`, `.7z.001`, `.z01`)
pub(crate) fn is_archive(name: &str) -> bool {
    let Some(ext) = extension(name) else {
        return false;
    };
    if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        return true;
    }
    if is_numbered_extension(&ext, 'r') || is_numbered_extension(&ext, 'z') {
        return true;
    }
    // archive.7z.001 / archive.zip.001
    if ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit()) {
        let lower = name.to_ascii_lowercase();
        let stem = &lower[..lower.len() - 4];
        return ARCHIVE_EXTENSIONS.iter().any(|a| stem.ends_with(&format!(".{}", a)));
    }
    false
}

/// `r00`..`r999`, `z01`.. style split-volume extension
pub(crate) fn is_numbered_extension(ext: &str, letter: char) -> bool {
    let mut chars = ext.chars();
    chars.next() == Some(letter)
        && ext.len() >= 3
        && ext.len() <= 4
        && chars.all(|c| c.is_ascii_digit())
}

/// Whether a path is part of a DVD or Blu-ray folder layout
pub(crate) fn is_disc_structure(name: &str) -> bool {
    let lower = name.to_ascii_lowercase().replace('\\', "/");
    if lower.split('/').any(|part| part == "video_ts" || part == "bdmv" || part == "audio_ts") {
        return true;
    }
    matches!(
        extension(&lower).as_deref(),
        Some("ifo") | Some("bup") | Some("bdmv") | Some("mpls") | Some("clpi")
    )
}

/// Sample, proof and info files that never carry the main payload
pub(crate) fn is_sample_like(name: &str) -> bool {
    let lower = base_name(name).to_ascii_lowercase();
    const MARKERS: &[&str] = &["sample", "proof"];
    if MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    matches!(
        extension(&lower).as_deref(),
        Some("nfo") | Some("sfv") | Some("txt") | Some("jpg") | Some("png") | Some("srr")
    )
}
