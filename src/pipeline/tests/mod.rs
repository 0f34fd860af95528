use super::*;
use crate::pipeline::test_helpers::*;
use crate::types::{ChatId, Event, OwnerId, Phase};
use std::sync::atomic::Ordering;

mod run;

const OWNER: OwnerId = OwnerId(100);
const CHAT: ChatId = ChatId(100);
