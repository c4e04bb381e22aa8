//! Varint command implementation.

use pixur_types::Varint;

/// Prints the varint text of each value.
pub fn encode(values: &[i64]) {
    for &v in values {
        println!("{v}\t{}", Varint(v).encode());
    }
}

/// Prints the number behind each varint text. Stops at the first bad input.
pub fn decode(texts: &[String]) -> anyhow::Result<()> {
    for text in texts {
        let Varint(v) = Varint::decode_all(text)
            .map_err(|e| anyhow::anyhow!("cannot decode {text:?}: {e}"))?;
        println!("{text}\t{v}");
    }
    Ok(())
}
