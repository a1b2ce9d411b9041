//! Feeding a patch chain through the edit-stream interpreter.
//!
//! The chain files are opened oldest first. Their decoded bodies form one
//! continuous source stream for the [`PatchEngine`]; the destination is the
//! patched container's table region followed by its pages.

use log::debug;
use rpak_format::{FormatError, PakHeader, PatchFileHeader, PatchInfo};
use rpak_patch::{EditStream, PatchEngine, PatchError, PatchState};

use crate::config::chain_file_name;
use crate::error::LoadError;
use crate::io::IoPriority;
use crate::loader::{Destination, LoadContext};
use crate::reader::ContainerStream;

pub(crate) struct PatchChain {
    info: PatchInfo,
    edit: Vec<u8>,
    edit_size: usize,
    engine: Option<PatchEngine>,
    /// Index of the chain file being read, or to open next.
    next_file: usize,
    source: Option<ContainerStream>,
}

impl PatchChain {
    pub(crate) fn new(info: PatchInfo) -> Self {
        let edit_size = info.data.edit_stream_size as usize;
        Self {
            info,
            edit: Vec::with_capacity(edit_size),
            edit_size,
            engine: None,
            next_file: 0,
            source: None,
        }
    }

    /// Append edit-stream bytes; returns how many were taken.
    pub(crate) fn collect_edit_stream(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.edit_size - self.edit.len());
        self.edit.extend_from_slice(&bytes[..take]);
        take
    }

    pub(crate) fn has_edit_stream(&self) -> bool {
        self.edit.len() == self.edit_size
    }

    /// Parse the collected edit stream and arm the interpreter.
    pub(crate) fn start(&mut self) -> Result<(), LoadError> {
        let stream = EditStream::parse(&self.edit)?;
        self.engine = Some(PatchEngine::new(stream));
        self.edit = Vec::new();
        Ok(())
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.engine.as_ref().is_some_and(PatchEngine::is_finished)
    }

    /// Error for an edit stream that ended before the destination was full.
    pub(crate) fn incomplete_destination(&self) -> Option<PatchError> {
        self.engine
            .as_ref()
            .filter(|engine| engine.is_finished())
            .map(PatchEngine::incomplete_destination)
    }

    /// Run the interpreter until it blocks on I/O, on the destination, or
    /// finishes. Returns whether anything moved.
    pub(crate) fn advance(
        &mut self,
        ctx: &LoadContext<'_>,
        dest: &mut Destination,
        name: &str,
        priority: IoPriority,
    ) -> Result<bool, LoadError> {
        let mut progress = false;
        loop {
            if self.source.is_none() && self.next_file < self.info.files.len() {
                let file = chain_file_name(name, self.info.numbers[self.next_file]);
                let source = ContainerStream::open(
                    ctx.io,
                    ctx.paths,
                    &file,
                    priority,
                    ctx.config.read_chunk_size,
                    ctx.config.max_reads_in_flight,
                )?;
                debug!(
                    "patch: {name} chain file {}/{}: {}",
                    self.next_file + 1,
                    self.info.files.len(),
                    source.path().display()
                );
                self.source = Some(source);
                progress = true;
            }

            if let Some(source) = self.source.as_mut() {
                if !source.has_body() {
                    let Some(header) = source.poll_header(ctx.io)? else {
                        return Ok(progress);
                    };
                    header.validate(&ctx.config.limits())?;
                    check_chain_file(&header, &self.info.files[self.next_file])?;
                    source.start_body(&header, &ctx.config.decoder())?;
                    progress = true;
                }
            }

            let Some(engine) = self.engine.as_mut() else {
                return Ok(progress);
            };
            let input = self.source.as_ref().map_or(&[][..], ContainerStream::output);
            let result = engine.apply(input, dest.window())?;
            if let Some(source) = self.source.as_mut() {
                source.consume_output(result.source_consumed);
            }
            dest.advance(result.dest_written);
            progress |= result.source_consumed > 0 || result.dest_written > 0;

            match result.state {
                PatchState::Finished => return Ok(progress),
                PatchState::NeedDestination => {
                    if dest.is_complete() {
                        return Err(engine.overrun().into());
                    }
                    return Ok(progress);
                }
                PatchState::NeedSource => match self.source.as_mut() {
                    Some(source) if source.is_drained() => {
                        if !source.drain(ctx.io) {
                            return Ok(progress);
                        }
                        source.close(ctx.io);
                        self.source = None;
                        self.next_file += 1;
                        progress = true;
                    }
                    Some(source) => {
                        if !source.pump(ctx.io)? {
                            return Ok(progress);
                        }
                        progress = true;
                    }
                    None => {
                        engine.finish_source()?;
                        return Ok(progress);
                    }
                },
            }
        }
    }

    /// Cancel outstanding chain reads; true once none remain.
    pub(crate) fn drain(&mut self, ctx: &LoadContext<'_>) -> bool {
        self.source.as_mut().map_or(true, |source| source.drain(ctx.io))
    }

    pub(crate) fn close(&mut self, ctx: &LoadContext<'_>) {
        if let Some(source) = self.source.take() {
            source.close(ctx.io);
        }
    }
}

fn check_chain_file(header: &PakHeader, expected: &PatchFileHeader) -> Result<(), FormatError> {
    if header.compressed_size != expected.compressed_size {
        return Err(FormatError::SizeMismatch {
            what: "patch chain file compressed size",
            expected: expected.compressed_size,
            actual: header.compressed_size,
        });
    }
    if header.decompressed_size != expected.decompressed_size {
        return Err(FormatError::SizeMismatch {
            what: "patch chain file decompressed size",
            expected: expected.decompressed_size,
            actual: header.decompressed_size,
        });
    }
    Ok(())
}
