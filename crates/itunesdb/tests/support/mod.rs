//! Byte-level builder for database fixtures.
#![allow(dead_code)]

pub const SAMPLE_LOCATIONS: [&str; 3] = [
    ":iPod_Control:Music:F00:AAAA.mp3",
    ":iPod_Control:Music:F01:BBBB.m4a",
    ":iPod_Control:Music:F01:CCCC.mp3",
];

pub const SAMPLE_IDS: [u64; 3] = [0x1001, 0x1002, 0x1003];

pub fn header(len: usize) -> Vec<u8> {
    vec![0u8; len]
}

pub fn put_u32(bytes: &mut Vec<u8>, at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(bytes: &mut Vec<u8>, at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// A record whose third prefix word is its total length.
pub fn record(tag: &[u8; 4], mut head: Vec<u8>, children: &[Vec<u8>]) -> Vec<u8> {
    let header_len = head.len();
    let total = header_len + children.iter().map(Vec::len).sum::<usize>();
    head[0..4].copy_from_slice(tag);
    put_u32(&mut head, 4, header_len as u32);
    put_u32(&mut head, 8, total as u32);
    for child in children {
        head.extend_from_slice(child);
    }
    head
}

/// A list whose third prefix word is its entry count.
pub fn list(tag: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let mut head = header(0x5C);
    head[0..4].copy_from_slice(tag);
    put_u32(&mut head, 4, 0x5C);
    put_u32(&mut head, 8, children.len() as u32);
    for child in children {
        head.extend_from_slice(child);
    }
    head
}

fn text_field(code: u32, encoding: u32, data: &[u8]) -> Vec<u8> {
    let mut bytes = header(40);
    bytes[0..4].copy_from_slice(b"mhod");
    put_u32(&mut bytes, 4, 0x18);
    put_u32(&mut bytes, 8, (40 + data.len()) as u32);
    put_u32(&mut bytes, 12, code);
    put_u32(&mut bytes, 24, encoding);
    put_u32(&mut bytes, 28, data.len() as u32);
    bytes.extend_from_slice(data);
    bytes
}

pub fn string_field(code: u32, text: &str) -> Vec<u8> {
    let data: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    text_field(code, 1, &data)
}

pub fn utf8_field(code: u32, text: &str) -> Vec<u8> {
    text_field(code, 2, text.as_bytes())
}

pub fn track_header(unique_ref: u32, persistent_id: u64) -> Vec<u8> {
    let mut head = header(0x9C);
    put_u32(&mut head, 16, unique_ref);
    put_u64(&mut head, 112, persistent_id);
    head
}

pub fn track_item(unique_ref: u32, persistent_id: u64, fields: &[Vec<u8>]) -> Vec<u8> {
    record(b"mhit", track_header(unique_ref, persistent_id), fields)
}

pub fn playlist_header(persistent_id: u64, master: bool) -> Vec<u8> {
    let mut head = header(0x6C);
    head[20] = u8::from(master);
    put_u64(&mut head, 28, persistent_id);
    head
}

pub fn member(track_ref: u32) -> Vec<u8> {
    let mut head = header(0x4C);
    put_u32(&mut head, 24, track_ref);
    record(b"mhip", head, &[])
}

pub fn playlist(persistent_id: u64, master: bool, name: &str, refs: &[u32]) -> Vec<u8> {
    let mut children = vec![string_field(1, name)];
    children.extend(refs.iter().map(|r| member(*r)));
    record(b"mhyp", playlist_header(persistent_id, master), &children)
}

pub fn data_set(kind: u32, child: &[u8]) -> Vec<u8> {
    let mut head = header(0x60);
    put_u32(&mut head, 12, kind);
    record(b"mhsd", head, &[child.to_vec()])
}

pub fn track_list(items: &[Vec<u8>]) -> Vec<u8> {
    list(b"mhlt", items)
}

pub fn playlist_list(playlists: &[Vec<u8>]) -> Vec<u8> {
    list(b"mhlp", playlists)
}

pub fn database(sets: &[Vec<u8>]) -> Vec<u8> {
    let mut head = header(0x68);
    put_u32(&mut head, 12, 1);
    put_u32(&mut head, 16, 0x19);
    record(b"mhbd", head, sets)
}

/// Three titled tracks with locations and a master playlist holding them.
pub fn sample_database() -> Vec<u8> {
    let titles = ["Alpha", "Beta", "Gamma"];
    let items: Vec<Vec<u8>> = (0..3)
        .map(|i| {
            track_item(
                100 + i as u32,
                SAMPLE_IDS[i],
                &[
                    string_field(1, titles[i]),
                    string_field(4, "Sample Artist"),
                    string_field(2, SAMPLE_LOCATIONS[i]),
                ],
            )
        })
        .collect();
    database(&[
        data_set(1, &track_list(&items)),
        data_set(2, &playlist_list(&[playlist(0x5000, true, "iPod", &[100, 101, 102])])),
    ])
}
