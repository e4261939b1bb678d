//! Mod-10 (Luhn) checksum over decimal order numbers.

/// Check whether `number` is a non-empty string of ASCII digits whose
/// Luhn checksum is zero.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    checksum(number.bytes().rev(), false) % 10 == 0
}

/// Compute the check digit that makes `payload` a valid Luhn number.
///
/// Returns `None` when `payload` contains anything but ASCII digits.
pub fn check_digit(payload: &str) -> Option<u8> {
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // The check digit will sit in the rightmost, undoubled position, so the
    // payload's rightmost digit is doubled.
    let sum = checksum(payload.bytes().rev(), true);
    Some(((10 - sum % 10) % 10) as u8)
}

/// Append the Luhn check digit to `payload`.
pub fn complete(payload: &str) -> Option<String> {
    check_digit(payload).map(|digit| format!("{payload}{digit}"))
}

fn checksum(digits_right_to_left: impl Iterator<Item = u8>, double_first: bool) -> u32 {
    digits_right_to_left
        .enumerate()
        .map(|(idx, byte)| {
            let digit = u32::from(byte - b'0');
            let doubled = (idx % 2 == 0) == double_first;
            if doubled {
                let d = digit * 2;
                if d > 9 {
                    d - 9
                } else {
                    d
                }
            } else {
                digit
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_numbers() {
        assert!(is_valid("79927398713"));
        assert!(is_valid("12345678903"));
        assert!(is_valid("346436439"));
        assert!(is_valid("0"));

        assert!(!is_valid("79927398710"));
        assert!(!is_valid("12345678904"));
        assert!(!is_valid(""));
        assert!(!is_valid("4561 2612 1234 5467"));
        assert!(!is_valid("abc"));
    }

    #[test]
    fn test_check_digit() {
        assert_eq!(check_digit("7992739871"), Some(3));
        assert_eq!(check_digit("1234567890"), Some(3));
        assert_eq!(check_digit("34643643"), Some(9));
        assert_eq!(check_digit("12a"), None);
        assert_eq!(complete("7992739871").as_deref(), Some("79927398713"));
    }

    proptest! {
        #[test]
        fn completed_numbers_validate(payload in "[0-9]{1,24}") {
            let number = complete(&payload).unwrap();
            prop_assert!(is_valid(&number));
        }

        #[test]
        fn single_digit_change_is_detected(payload in "[0-9]{1,24}", pos in 0usize..25, bump in 1u8..10) {
            let number = complete(&payload).unwrap();
            let pos = pos % number.len();
            let mut bytes = number.into_bytes();
            bytes[pos] = b'0' + (bytes[pos] - b'0' + bump) % 10;
            let mutated = String::from_utf8(bytes).unwrap();
            prop_assert!(!is_valid(&mutated));
        }

        #[test]
        fn non_digits_never_validate(s in ".*[^0-9].*") {
            prop_assert!(!is_valid(&s));
        }
    }
}
