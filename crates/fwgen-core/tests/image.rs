//! End-to-end layout and build tests driven through [`Generator`].

use std::fs;

use fwgen_core::crypto::CrcAlgorithm;
use fwgen_core::{BuildOptions, ErrorKind, Generator, Value};

fn build(schema: &str) -> Vec<u8> {
    Generator::from_str(schema, BuildOptions::default())
        .unwrap()
        .build()
        .unwrap()
}

fn build_err(schema: &str) -> fwgen_core::Error {
    Generator::from_str(schema, BuildOptions::default())
        .and_then(|mut generator| generator.build())
        .unwrap_err()
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[test]
fn byte_order_is_per_component() {
    let image = build(
        r#"<binary size="16"><layout>
             <number name="le" size="2" value="0xFF"/>
             <number name="be" size="2" value="0xFF" order="big"/>
           </layout></binary>"#,
    );
    assert_eq!(image, [0xFF, 0x00, 0x00, 0xFF]);
}

#[test]
fn table_rows_see_their_index() {
    let image = build(
        r#"<binary size="16"><layout>
             <table name="t" count="3"><number name="n" size="1" calculate="{index}"/></table>
           </layout></binary>"#,
    );
    assert_eq!(image, [0, 1, 2]);
}

#[test]
fn table_rows_sort_by_key() {
    let image = build(
        r#"<binary size="16"><layout>
             <table name="t" count="3" sort="0 - {index}">
               <number name="n" size="1" calculate="{index} + 1"/>
             </table>
           </layout></binary>"#,
    );
    assert_eq!(image, [3, 2, 1]);
}

#[test]
fn alignment_offset_and_padding() {
    let mut generator = Generator::from_str(
        r#"<binary size="64"><layout>
             <number name="a" size="1" value="1"/>
             <number name="b" size="2" value="2" align="4"/>
             <bytes name="c" value="AA" padding="4"/>
             <number name="d" size="1" value="3" offset="0x10"/>
           </layout></binary>"#,
        BuildOptions::default(),
    )
    .unwrap();
    let image = generator.build().unwrap();
    assert_eq!(image.len(), 0x11);
    assert_eq!(&image[..4], &[1, 0, 0, 0]);
    assert_eq!(&image[4..6], &[2, 0]);
    assert_eq!(&image[6..10], &[0xAA, 0, 0, 0]);
    assert_eq!(image[0x10], 3);

    let placements = generator.placements();
    let c = placements.iter().find(|p| p.path == "/layout/c").unwrap();
    assert_eq!((c.offset, c.size), (6, 4));
}

#[test]
fn offset_behind_cursor_is_located() {
    let err = build_err(
        r#"<binary size="16"><layout>
             <group name="header">
               <number name="magic" size="4" value="1"/>
               <crc name="crc" algorithm="crc16" input="[0:4]" offset="2"/>
             </group>
           </layout></binary>"#,
    );
    assert!(matches!(err.kind(), ErrorKind::Layout(_)));
    assert_eq!(err.component_path(), "/layout/header/crc");
    assert!(err.to_string().starts_with("/layout/header/crc: layout error:"), "{err}");
}

#[test]
fn capacity_is_enforced() {
    let err = build_err(r#"<binary size="2"><layout><number name="n" size="4"/></layout></binary>"#);
    assert!(matches!(err.kind(), ErrorKind::Buffer(_)), "{err}");
}

#[test]
fn disabled_components_take_no_space() {
    let mut generator = Generator::from_str(
        r#"<binary size="16">
             <settings><number name="debug" size="1" value="0"/></settings>
             <layout>
               <number name="a" size="1" value="1"/>
               <number name="dbg" size="2" value="0xBEEF" enabled="/settings/debug == 1"/>
               <number name="b" size="1" value="2"/>
               <number name="where" size="1" signed="true" calculate="/layout/dbg.offset"/>
             </layout>
           </binary>"#,
        BuildOptions::default(),
    )
    .unwrap();
    assert_eq!(generator.build().unwrap(), [1, 2, 0xFF]);
    let dbg = generator.component("/layout/dbg").unwrap();
    assert!(!dbg.enabled());
    assert_eq!(dbg.size(), 0);
}

#[test]
fn bitfields_pack_their_bits() {
    let image = build(
        r#"<binary size="16"><layout>
             <bitfield name="f" size="1">
               <bit name="lo" bits="0:3" value="5"/>
               <bit name="hi" bits="4:7" calculate="0xA"/>
             </bitfield>
             <register name="r" size="1" reserved_value="0xF0">
               <bit name="en" bits="0" value="1"/>
             </register>
           </layout></binary>"#,
    );
    assert_eq!(image, [0xA5, 0xF1]);
}

#[test]
fn bitfield_must_cover_every_bit() {
    let err = build_err(
        r#"<binary size="16"><layout>
             <bitfield name="f" size="1"><bit name="lo" bits="0:3"/></bitfield>
           </layout></binary>"#,
    );
    assert!(matches!(err.kind(), ErrorKind::Schema(_)));
    assert_eq!(err.component_path(), "/layout/f");
}

// ---------------------------------------------------------------------------
// Computed values
// ---------------------------------------------------------------------------

#[test]
fn crc16_of_check_string() {
    let image = build(
        r#"<binary size="32"><layout>
             <string name="s" value="123456789"/>
             <crc name="c" algorithm="crc16" input="/layout/s" order="big"/>
           </layout></binary>"#,
    );
    assert_eq!(&image[9..], &[0x29, 0xB1]);
}

#[test]
fn forward_references_build_on_demand() {
    let image = build(
        r#"<binary size="128"><layout>
             <number name="len" size="2" calculate="/layout/body.size"/>
             <hash name="digest" algorithm="sha256" input="/layout/body"/>
             <string name="body" value="abc"/>
           </layout></binary>"#,
    );
    assert_eq!(&image[..2], &[3, 0]);
    assert_eq!(
        hex::encode(&image[2..34]),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(&image[34..], b"abc");
}

#[test]
fn range_inputs_cover_later_bytes() {
    let image = build(
        r#"<binary size="32"><layout>
             <checksum name="sum" method="sum" input="[1:4]"/>
             <number name="a" size="1" value="1"/>
             <number name="b" size="2" value="0x0201"/>
           </layout></binary>"#,
    );
    assert_eq!(image, [4, 1, 1, 2]);
}

#[test]
fn self_referencing_cycle_is_an_error() {
    let err = build_err(
        r#"<binary size="16"><layout>
             <number name="a" size="1" calculate="/layout/b"/>
             <number name="b" size="1" calculate="/layout/a"/>
           </layout></binary>"#,
    );
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn validation_failures_are_value_errors() {
    let err = build_err(
        r#"<binary size="16"><layout>
             <number name="v" size="1" calculate="1 + 2" validate="this.value &lt; 3"/>
           </layout></binary>"#,
    );
    assert!(matches!(err.kind(), ErrorKind::Value(_)));
    assert_eq!(err.component_path(), "/layout/v");
}

#[test]
fn table_entry_selects_a_row() {
    let image = build(
        r#"<binary size="16">
             <settings>
               <number name="sel" size="1" value="2"/>
               <table_entry name="pick" table="/layout/t" key="{index} == /settings/sel"/>
             </settings>
             <layout>
               <table name="t" count="3"><number name="id" size="1" calculate="{index} * 10"/></table>
               <number name="chosen" size="1" calculate="/settings/pick.value"/>
             </layout>
           </binary>"#,
    );
    assert_eq!(image, [0, 10, 20, 20]);
}

#[test]
fn strings_read_from_bytes_drop_trailing_nuls() {
    let mut generator = Generator::from_str(
        r#"<binary size="16">
             <settings>
               <bytes name="raw" value="41420000"/>
               <string name="label" calculate="/settings/raw.value"/>
             </settings>
             <layout><string name="out" size="4" calculate="/settings/label.value"/></layout>
           </binary>"#,
        BuildOptions::default(),
    )
    .unwrap();
    assert_eq!(generator.build().unwrap(), b"AB\0\0");
    assert_eq!(
        generator.component("/settings/label").unwrap().value(),
        &Value::Text("AB".to_string())
    );
}

#[test]
fn files_are_embedded_by_range() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("blob.bin"), [9, 8, 7, 6, 5]).unwrap();
    let options = BuildOptions {
        base_dir: dir.path().to_path_buf(),
        ..BuildOptions::default()
    };
    let mut generator = Generator::from_str(
        r#"<binary size="16"><layout>
             <file name="f" path="blob.bin" file_offset="1" length="3" save_file_path="f.out"/>
             <number name="len" size="1" calculate="/layout/f.size"/>
           </layout></binary>"#,
        options,
    )
    .unwrap();
    assert_eq!(generator.build().unwrap(), [8, 7, 6, 3]);
    assert_eq!(fs::read(dir.path().join("f.out")).unwrap(), [8, 7, 6]);
}

#[test]
fn missing_file_is_an_io_error() {
    let err = build_err(r#"<binary size="16"><layout><file name="f" path="/nonexistent/x.bin"/></layout></binary>"#);
    assert!(matches!(err.kind(), ErrorKind::Io { .. }));
    assert_eq!(err.component_path(), "/layout/f");
}

// ---------------------------------------------------------------------------
// Overrides and rules
// ---------------------------------------------------------------------------

const RULES: &str = r#"
    <binary size="16">
      <settings>
        <number name="version" size="1" value="1" duplicates='["/layout/v"]'/>
        <number name="flags" size="1" value="0x21"/>
      </settings>
      <layout>
        <number name="v" size="1"/>
        <number name="low" size="1" dependency='[{"kind":"get","path":"/settings/flags","bits":"0:3"}]'/>
      </layout>
    </binary>"#;

#[test]
fn set_value_propagates_and_is_idempotent() {
    let mut generator = Generator::from_str(RULES, BuildOptions::default()).unwrap();
    assert_eq!(
        generator.set_value("/settings/version", "7").unwrap(),
        ["/settings/version", "/layout/v"]
    );
    assert_eq!(generator.set_value("/settings/version", "7").unwrap(), ["/settings/version"]);
    assert_eq!(
        generator.set_value("/settings/flags", "0x2C").unwrap(),
        ["/settings/flags", "/layout/low"]
    );
    assert_eq!(generator.build().unwrap(), [7, 0xC]);
}

#[test]
fn rule_defaults_are_derived_before_build() {
    let mut generator = Generator::from_str(RULES, BuildOptions::default()).unwrap();
    assert_eq!(generator.component("/layout/low").unwrap().value(), &Value::Int(1));
    assert_eq!(generator.component("/layout/v").unwrap().value(), &Value::Int(1));
    assert_eq!(generator.build().unwrap(), [1, 1]);
}

#[test]
fn schema_literals_reach_their_duplicates() {
    let image = build(
        r#"<binary size="4">
             <settings><number name="version" size="1" value="3" duplicates='["/layout/v"]'/></settings>
             <layout><number name="v" size="1"/></layout>
           </binary>"#,
    );
    assert_eq!(image, [3]);
}

#[test]
fn get_copies_a_calculated_source() {
    let image = build(
        r#"<binary size="4">
             <settings><number name="a" size="1" calculate="2 + 3"/></settings>
             <layout>
               <number name="b" size="1" dependency='[{"kind":"get","path":"/settings/a"}]'/>
             </layout>
           </binary>"#,
    );
    assert_eq!(image, [5]);
}

#[test]
fn get_copies_a_derived_source() {
    let image = build(
        r#"<binary size="8">
             <layout>
               <number name="x" size="2" value="0x1234"/>
               <number name="early" size="1" dependency='[{"kind":"get","path":"/layout/c"}]'/>
               <crc name="c" algorithm="crc8" input="[0:2]"/>
               <number name="late" size="1" dependency='[{"kind":"get","path":"/layout/c"}]'/>
             </layout>
           </binary>"#,
    );
    let crc = u8::try_from(CrcAlgorithm::Crc8.compute(&[0x34, 0x12])).unwrap();
    assert_eq!(image, [0x34, 0x12, crc, crc, crc]);
}

#[test]
fn overrides_win_over_rules() {
    let options = BuildOptions {
        overrides: vec!["layout/low=9".into(), "/settings/flags=0x2F".into()],
        ..BuildOptions::default()
    };
    let mut generator = Generator::from_str(RULES, options).unwrap();
    assert!(generator.component("/layout/low").unwrap().is_overridden());
    assert_eq!(generator.build().unwrap(), [1, 9]);
}

#[test]
fn set_value_rejects_bad_literals_and_late_calls() {
    let mut generator = Generator::from_str(RULES, BuildOptions::default()).unwrap();
    let err = generator.set_value("/settings/version", "0x100").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Value(_)));
    assert_eq!(err.component_path(), "/settings/version");

    generator.build().unwrap();
    assert!(generator.set_value("/settings/version", "2").is_err());
    assert!(generator.build().is_err());
}

#[test]
fn map_lists_placed_components() {
    let mut generator = Generator::from_str(RULES, BuildOptions::default()).unwrap();
    generator.build().unwrap();
    let map = generator.map(true);
    let layout = &map["children"][0];
    assert_eq!(layout["path"], "/layout");
    assert_eq!(layout["children"][1]["name"], "low");
    assert_eq!(layout["children"][1]["offset"], 1);
    assert_eq!(layout["children"][1]["value"], "01");
    assert_eq!(map["children"].as_array().unwrap().len(), 1);
}
