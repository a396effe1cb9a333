//! Parser for `df -h --output=source,size,avail,target` rows.

/// One mounted LTFS filesystem reported by `df`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtfsMount {
    /// Device behind the mount (the part after the `ltfs:` prefix).
    pub device: String,
    /// Total size in bytes.
    pub size: u64,
    /// Available bytes.
    pub avail: u64,
    /// Mount directory.
    pub target: String,
}

/// Convert a `df -h` size field to bytes.
///
/// `T`/`G`/`M` suffixes scale by powers of 1024; a bare number is
/// 1K blocks; an empty field is zero.
pub fn size_to_bytes(field: &str) -> u64 {
    let field = field.trim();
    if field.is_empty() {
        return 0;
    }
    let (number, scale): (&str, u64) = match field.as_bytes()[field.len() - 1] {
        b'T' => (&field[..field.len() - 1], 1u64 << 40),
        b'G' => (&field[..field.len() - 1], 1u64 << 30),
        b'M' => (&field[..field.len() - 1], 1u64 << 20),
        _ => (field, 1u64 << 10),
    };
    number
        .parse::<f64>()
        .map(|value| (value * scale as f64) as u64)
        .unwrap_or(0)
}

/// Extract the `ltfs:`-sourced rows from `df` output.
pub fn parse_df(output: &str) -> Vec<LtfsMount> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let source = columns.next()?;
            let device = source.strip_prefix("ltfs:")?;
            let size = columns.next()?;
            let avail = columns.next()?;
            let target = columns.next()?;
            Some(LtfsMount {
                device: device.to_string(),
                size: size_to_bytes(size),
                avail: size_to_bytes(avail),
                target: target.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_suffixes() {
        assert_eq!(size_to_bytes("1T"), 1u64 << 40);
        assert_eq!(size_to_bytes("500G"), 500 * (1u64 << 30));
        assert_eq!(size_to_bytes("10M"), 10 * (1u64 << 20));
        assert_eq!(size_to_bytes("2048"), 2048 * 1024);
        assert_eq!(size_to_bytes(""), 0);
    }

    #[test]
    fn test_fractional_sizes() {
        assert_eq!(size_to_bytes("2.2T"), (2.2 * (1u64 << 40) as f64) as u64);
        assert_eq!(size_to_bytes("1.5G"), (1.5 * (1u64 << 30) as f64) as u64);
    }

    #[test]
    fn test_parse_df_keeps_only_ltfs_rows() {
        let output = "\
Filesystem       Size  Avail Mounted on\n\
/dev/nvme0n1p2   916G   387G /\n\
ltfs:/dev/sg3    5.4T   5.4T /mnt/ltfs/drive1\n\
tmpfs             16G    16G /tmp\n\
ltfs:/dev/sg4    2.2T   1.0T /mnt/ltfs/drive2\n";

        let mounts = parse_df(output);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].device, "/dev/sg3");
        assert_eq!(mounts[0].target, "/mnt/ltfs/drive1");
        assert_eq!(mounts[1].device, "/dev/sg4");
        assert_eq!(mounts[1].avail, 1u64 << 40);
    }

    #[test]
    fn test_parse_df_ignores_short_rows() {
        assert!(parse_df("ltfs:/dev/sg3 5.4T\n").is_empty());
    }
}
