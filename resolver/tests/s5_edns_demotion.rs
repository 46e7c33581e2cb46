//! End-to-end: a peer that answers FORMERR to an EDNS-carrying query gets
//! demoted, first to sending EDNS without a PING probe, then (on a second
//! FORMERR) to not sending EDNS to it at all; after the reprobe interval
//! passes, probing resumes.

mod common;

use std::net::Ipv4Addr;

use common::{drive_to_completion, Harness};
use resolver::edns::EdnsMode;
use resolver::model::{Name, Rcode, CLASS_IN, TYPE_A};

fn last_query_additional_count(harness: &Harness) -> usize {
	let bytes = harness.transport.borrow().sent.last().unwrap().1.clone();
	net::dns::parse_response(&bytes).unwrap().additional.len()
}

#[test]
fn formerr_demotes_edns_mode_and_reprobes_after_cooldown() {
	let harness = Harness::new(1_000);
	let peer: std::net::IpAddr = "198.51.100.40".parse().unwrap();

	harness.seed_ns("example.test", 3_600_000, &["ns.example.test"]);
	harness.seed_glue("ns.example.test", 3_600_000, Ipv4Addr::new(198, 51, 100, 40));

	assert_eq!(harness.engine.storage.borrow().edns.mode(peer), EdnsMode::Unknown);

	// call 1: fresh peer gets probed (OPT+ping); FORMERR demotes Unknown -> EdnsNoPing.
	harness.transport.borrow_mut().push_script(peer, |id, qname, qtype| common::encode_response(id, &qname, qtype, 1 /* FORMERR */, false, &[], &[], &[]));
	let first = Box::pin(harness.engine.begin_resolve(Name::from("one.example.test"), TYPE_A, CLASS_IN));
	let answer = drive_to_completion(&harness, first, 1.0, 10);
	assert_eq!(answer.rcode, Rcode::ServFail);
	assert_eq!(harness.engine.storage.borrow().edns.mode(peer), EdnsMode::EdnsNoPing);
	assert_eq!(last_query_additional_count(&harness), 1, "the probing query still carried an OPT record");

	// call 2: EdnsNoPing still attaches a bare OPT record (no ping); a second
	// FORMERR escalates EdnsNoPing -> NoEdns.
	harness.transport.borrow_mut().push_script(peer, |id, qname, qtype| common::encode_response(id, &qname, qtype, 1, false, &[], &[], &[]));
	let second = Box::pin(harness.engine.begin_resolve(Name::from("two.example.test"), TYPE_A, CLASS_IN));
	let answer = drive_to_completion(&harness, second, 1.0, 10);
	assert_eq!(answer.rcode, Rcode::ServFail);
	assert_eq!(harness.engine.storage.borrow().edns.mode(peer), EdnsMode::NoEdns);
	assert_eq!(last_query_additional_count(&harness), 1, "EdnsNoPing still sends a bare OPT record");

	// call 3: NoEdns suppresses the OPT record entirely.
	harness.transport.borrow_mut().push_script(peer, |id, qname, qtype| {
		common::encode_response(id, &qname, qtype, 0, true, &[common::rr_a("three.example.test", 60, Ipv4Addr::new(203, 0, 113, 50))], &[], &[])
	});
	let third = Box::pin(harness.engine.begin_resolve(Name::from("three.example.test"), TYPE_A, CLASS_IN));
	let answer = drive_to_completion(&harness, third, 1.0, 10);
	assert_eq!(answer.rcode, Rcode::NoError);
	assert_eq!(last_query_additional_count(&harness), 0, "NoEdns must stop attaching an OPT record");

	// cooldown: after the reprobe interval, a probe is attempted again.
	harness.clock.advance(resolver::edns::REPROBE_INTERVAL as f64 + 1.0);
	harness.transport.borrow_mut().push_script(peer, |id, qname, qtype| {
		common::encode_response(id, &qname, qtype, 0, true, &[common::rr_a("four.example.test", 60, Ipv4Addr::new(203, 0, 113, 51))], &[], &[])
	});
	let fourth = Box::pin(harness.engine.begin_resolve(Name::from("four.example.test"), TYPE_A, CLASS_IN));
	let answer = drive_to_completion(&harness, fourth, 1.0, 10);
	assert_eq!(answer.rcode, Rcode::NoError);
	assert_eq!(last_query_additional_count(&harness), 1, "after cooldown a probe is sent again");
}
