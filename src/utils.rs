pub fn get_filesize_with_unit(bytes: u64) -> String {
    let kb = bytes / 1024;
    let mb = kb / 1024;
    let gb = mb / 1024;

    if gb > 0 {
        format!("{} GB", gb)
    } else if mb > 0 {
        format!("{} MB", mb)
    } else if kb > 0 {
        format!("{} KB", kb)
    } else {
        format!("{} B", bytes)
    }
}

/// Map a block-map logical name to the name the zip container stores it
/// under: `\` becomes `/` and the OPC-reserved punctuation is
/// percent-encoded.
///
/// Examples
/// ```
/// # use msix::utils::encode_file_name;
/// assert_eq!(encode_file_name(r"Assets\Square44x44Logo.png"), "Assets/Square44x44Logo.png");
/// assert_eq!(encode_file_name(r"docs\read me!.txt"), "docs/read%20me%21.txt");
/// ```
pub fn encode_file_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            ' ' => result.push_str("%20"),
            '!' => result.push_str("%21"),
            '#' => result.push_str("%23"),
            '$' => result.push_str("%24"),
            '%' => result.push_str("%25"),
            '&' => result.push_str("%26"),
            '\'' => result.push_str("%27"),
            '(' => result.push_str("%28"),
            ')' => result.push_str("%29"),
            '+' => result.push_str("%2B"),
            ',' => result.push_str("%2C"),
            ';' => result.push_str("%3B"),
            '=' => result.push_str("%3D"),
            '@' => result.push_str("%40"),
            '[' => result.push_str("%5B"),
            ']' => result.push_str("%5D"),
            '\\' => result.push('/'),
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesize_units() {
        assert_eq!(get_filesize_with_unit(512), "512 B");
        assert_eq!(get_filesize_with_unit(2048), "2 KB");
        assert_eq!(get_filesize_with_unit(3 * 1024 * 1024), "3 MB");
        assert_eq!(get_filesize_with_unit(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn encodes_container_names() {
        assert_eq!(encode_file_name("AppxManifest.xml"), "AppxManifest.xml");
        assert_eq!(
            encode_file_name(r"Assets\logo [x64] (scale-200).png"),
            "Assets/logo%20%5Bx64%5D%20%28scale-200%29.png"
        );
        assert_eq!(encode_file_name(r"a\b\c d+e;f=g.bin"), "a/b/c%20d%2Be%3Bf%3Dg.bin");
    }
}
