#![no_main]

use libfuzzer_sys::fuzz_target;
use xcash_chain::tx_extra;

fuzz_target!(|data: &[u8]| {
    if let Some((id, sig)) = tx_extra::get_leader_info(data) {
        // Anything decodable must also strip and re-encode cleanly.
        let stripped = tx_extra::remove_leader_info(data).expect("decodable entry strips");
        let mut rebuilt = stripped;
        tx_extra::add_leader_info(&mut rebuilt, &id, &sig);
        let _ = tx_extra::get_leader_info(&rebuilt).expect("re-encoded entry decodes");
    } else {
        assert!(tx_extra::remove_leader_info(data).is_none());
    }
    let _ = tx_extra::strip_template_entries(data);
});
