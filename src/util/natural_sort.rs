//! Numeric-aware string collation so local-filesystem listings agree with
//! S3's natural lexicographic ordering on names like `file2`/`file10`
//! (spec.md §4.1 "Listing order").

use std::cmp::Ordering;

/// Compares two strings the way a human would sort file names: runs of
/// ASCII digits compare by numeric value, everything else compares
/// byte-for-byte.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.char_indices().peekable();
    let mut bi = b.char_indices().peekable();

    loop {
        match (ai.peek(), bi.peek()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&(_, ca)), Some(&(_, cb))) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut ai);
                    let nb = take_number(&mut bi);
                    match na.cmp(&nb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                } else {
                    ai.next();
                    bi.next();
                    match ca.cmp(&cb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
            }
        }
    }
}

fn take_number(iter: &mut std::iter::Peekable<std::str::CharIndices>) -> u128 {
    let mut value: u128 = 0;
    while let Some(&(_, c)) = iter.peek() {
        if let Some(d) = c.to_digit(10) {
            value = value.saturating_mul(10).saturating_add(d as u128);
            iter.next();
        } else {
            break;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_digits_numerically() {
        let mut names = vec!["file10", "file2", "file1"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["file1", "file2", "file10"]);
    }

    #[test]
    fn falls_back_to_lexicographic() {
        assert_eq!(natural_cmp("abc", "abd"), Ordering::Less);
        assert_eq!(natural_cmp("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn mixed_prefix_and_digits() {
        let mut names = vec!["img100.jpg", "img2.jpg", "img20.jpg", "img3.jpg"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["img2.jpg", "img3.jpg", "img20.jpg", "img100.jpg"]);
    }
}
