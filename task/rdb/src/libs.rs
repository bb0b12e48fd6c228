// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Overlay-to-library mapping.
//!
//! The host program pages overlays in and out of RAM at its own pace.
//! The debugger is told about them as dynamic "libraries" so it can
//! rebase symbols: one `<library>` element per loaded overlay, named
//! after its object file.
//!
//! Game-state overlays don't carry names in their table, so a fixed
//! name table fills them in; slots with no name there never report.
//! The other categories name themselves. Descriptor construction
//! tolerates half-initialized table slots (no code address yet) by
//! yielding nothing for that slot, which shows up to the caller the
//! same as category exhaustion; the cursor has already moved on, so
//! the stream just continues with the next slot or category.

use ultra::{HostOs, LibKind, Library, OverlayCategory, OverlayEntry};

/// Most library elements a single transfer chunk carries.
pub const MAX_XFER_LIBS: usize = 15;

static GAMESTATE_NAMES: [Option<&str>; 6] = [
    None,
    Some("select"),
    Some("title"),
    None,
    Some("opening"),
    Some("file_choose"),
];

/// Builds the reportable descriptor for one overlay table slot.
pub fn describe(
    cat: OverlayCategory,
    idx: usize,
    entry: &OverlayEntry,
) -> Option<Library> {
    if entry.vram_start == 0 {
        return None;
    }

    let name = match cat {
        OverlayCategory::GameState => {
            GAMESTATE_NAMES.get(idx).copied().flatten()
        }
        _ => entry.name,
    }?;

    Some(Library {
        kind: LibKind::Overlay,
        name,
        vram_start: entry.vram_start,
        vram_end: entry.vram_end,
        load_addr: entry.load_addr,
    })
}

/// Yields the next loaded overlay of `cat` at or after `*pos`, advancing
/// the cursor. `None` means this call produced nothing -- either the
/// category is exhausted or the slot it landed on wasn't reportable.
pub fn next_lib<H: HostOs>(
    host: &H,
    cat: OverlayCategory,
    pos: &mut usize,
) -> Option<Library> {
    let table = host.overlays(cat);

    while *pos < table.len() {
        let idx = *pos;
        *pos += 1;

        let entry = &table[idx];
        if entry.load_addr.is_some() {
            return describe(cat, idx, entry);
        }
    }

    None
}
