//! Property tests for the engine command-line codec.
//!
//! Any descriptor built from the vocabulary survives encoding to an argv,
//! quoting into a single log line and decoding back.

use proptest::prelude::*;

use catapult::resolver::vocabulary::is_path_key;
use catapult::resolver::{command_line, decode_args, tokenize, Descriptor, ParamKind, ParamValue, VOCABULARY};

const FILE_NAME: &str = "[A-Za-z0-9_]{1,10}\\.[a-z]{1,4}";
const TEXT: &str = "[A-Za-z0-9_.][A-Za-z0-9_. :/-]{0,11}";

fn value_strategy(key: &'static str, kind: ParamKind) -> BoxedStrategy<ParamValue> {
    match kind {
        ParamKind::Bool => Just(ParamValue::Bool(true)).boxed(),
        ParamKind::Number => (-1.0e6f64..1.0e6).prop_map(ParamValue::Number).boxed(),
        ParamKind::Str if is_path_key(key) => FILE_NAME.prop_map(ParamValue::Str).boxed(),
        ParamKind::Str => TEXT.prop_map(ParamValue::Str).boxed(),
        ParamKind::List => {
            let item = match key {
                "unimod" => "[0-9]{1,3}",
                "channels" => "[A-Za-z0-9_,.:]{1,12}",
                k if is_path_key(k) => FILE_NAME,
                _ => TEXT,
            };
            prop::collection::vec(item, 1..4).prop_map(ParamValue::List).boxed()
        }
    }
}

fn descriptor_strategy() -> impl Strategy<Value = Descriptor> {
    let entries: Vec<_> = VOCABULARY
        .iter()
        .map(|&(key, kind)| prop::option::weighted(0.15, value_strategy(key, kind)).prop_map(move |v| (key, v)))
        .collect();

    entries.prop_map(|entries| {
        let mut descriptor = Descriptor::default();
        for (key, value) in entries {
            if let Some(value) = value {
                descriptor.set(key, value);
            }
        }
        descriptor
    })
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(descriptor in descriptor_strategy()) {
        let argv = command_line("diann", &descriptor);
        let decoded = decode_args(&argv).unwrap();

        prop_assert_eq!(decoded.engine_path.as_deref(), Some("diann"));
        prop_assert_eq!(&decoded.params, &descriptor.params);

        let files = descriptor.list("f");
        if files.is_empty() {
            prop_assert_eq!(decoded.total_files, None);
        } else {
            prop_assert_eq!(decoded.total_files, Some(files.len() as u64));
        }
    }

    #[test]
    fn prop_log_line_tokenizes_to_argv(descriptor in descriptor_strategy()) {
        let argv = command_line("/opt/diann/diann-linux", &descriptor);
        let line = shlex::try_join(argv.iter().map(String::as_str)).unwrap();

        prop_assert_eq!(tokenize(&line).unwrap(), argv);
    }

    #[test]
    fn prop_decode_keeps_only_file_names(dirs in prop::collection::vec("[a-z]{1,8}", 1..4), name in FILE_NAME) {
        let path = format!("/{}/{}", dirs.join("/"), name);
        let argv = vec![
            "diann".to_string(),
            "--f".to_string(),
            path.clone(),
            "--fasta".to_string(),
            path,
        ];
        let decoded = decode_args(&argv).unwrap();

        prop_assert_eq!(decoded.list("f"), vec![name.clone()]);
        prop_assert_eq!(decoded.list("fasta"), vec![name]);
    }
}
