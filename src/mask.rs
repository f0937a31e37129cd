/// XORs `payload` with the repeating 4-byte `mask`.
///
/// Masking and unmasking are the same operation.
pub fn apply(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_example() {
        // RFC 6455 section 5.7, "Hello" masked with 37 fa 21 3d.
        let mut payload = [0x7f, 0x9f, 0x4d, 0x51, 0x58];

        apply(&mut payload, [0x37, 0xfa, 0x21, 0x3d]);

        assert_eq!(&payload, b"Hello");
    }

    #[test]
    fn twice_is_identity() {
        let mut payload = *b"some payload longer than the key";

        apply(&mut payload, [1, 2, 3, 4]);
        assert_ne!(&payload, b"some payload longer than the key");

        apply(&mut payload, [1, 2, 3, 4]);
        assert_eq!(&payload, b"some payload longer than the key");
    }
}
