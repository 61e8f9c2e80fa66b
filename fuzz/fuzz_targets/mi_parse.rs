#![no_main]

use libfuzzer_sys::fuzz_target;
use mibridge::{parse, parse_value, Record};

const MAX_INPUT_BYTES: usize = 8192;

fn decode_output(bytes: &[u8]) -> String {
    let capped = &bytes[..bytes.len().min(MAX_INPUT_BYTES)];
    String::from_utf8_lossy(capped).into_owned()
}

fuzz_target!(|data: &[u8]| {
    let text = decode_output(data);
    for line in text.lines() {
        if let Ok(record) = parse(line) {
            let rendered = record.to_string();
            assert!(!rendered.is_empty());
            assert_eq!(parse(&rendered).as_ref(), Ok(&record), "{line:?} -> {rendered:?}");
            if let Record::Result(result) = record {
                let _ = result.into_result();
            }
        }
    }
    if let Ok(value) = parse_value(&text) {
        assert_eq!(parse_value(&value.to_string()), Ok(value));
    }
});
